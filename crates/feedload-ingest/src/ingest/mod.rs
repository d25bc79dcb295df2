//! Ingestion pipeline: table naming, batch writing, table swaps, and
//! the per-file orchestrator.

pub mod naming;
pub mod orchestrator;
pub mod status;
pub mod swap;
pub mod writer;

pub use naming::TableNames;
pub use orchestrator::Ingester;
pub use status::{IngestStatus, JobState};
pub use swap::TableSwapper;
pub use writer::{BatchPool, BatchWriter, WriteDisposition};
