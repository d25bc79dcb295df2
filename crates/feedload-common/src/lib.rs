//! Feedload Common Library
//!
//! Shared types, error handling, and logging setup for the feedload
//! workspace.
//!
//! - **Error Handling**: the [`FeedloadError`] taxonomy and `Result` alias
//! - **Logging**: `tracing`-based logging configuration and initialization

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{DbError, FeedloadError, Result};
