//! Feedload Ingest Library
//!
//! Bulk-loads compressed, archive-wrapped tabular feed files into a
//! relational store (PostgreSQL or MySQL), supporting full table
//! replacement, incremental merge, and resumable runs after partial
//! failure.
//!
//! # Pipeline
//!
//! A feed archive is streamed through four stages:
//!
//! 1. [`feed::FeedReader`] — streaming decompression and record framing
//! 2. [`feed::FeedParser`] — header metadata extraction and typed row decoding
//! 3. [`ingest::Ingester`] — strategy selection, batching, checkpointing
//! 4. [`ingest::TableSwapper`] — atomic staging-to-live table cutover
//!
//! # Example
//!
//! ```no_run
//! use feedload_ingest::config::IngestConfig;
//! use feedload_ingest::db::connect;
//! use feedload_ingest::ingest::Ingester;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::default();
//!     let db = connect(&config).await?;
//!     let mut ingester = Ingester::open(db, &config, "./feeds/artist-collection.tbz")?;
//!     ingester.ingest(false).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod feed;
pub mod ingest;

pub use feedload_common::{DbError, FeedloadError, Result};
