//! Error types for feedload

use thiserror::Error;

/// Result type alias for feedload operations
pub type Result<T> = std::result::Result<T, FeedloadError>;

/// Classified database errors, as reported by a store executor.
///
/// Every statement execution resolves to one of these three classes; the
/// ingest layer decides per class whether to log, continue, or abort.
#[derive(Error, Debug)]
pub enum DbError {
    /// A backend warning. Logged and ignored by the ingest layer.
    #[error("database warning: {0}")]
    Warning(String),

    /// A primary-key or uniqueness violation.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// Any other backend error. Fatal: aborts the run.
    #[error("database error: {0}")]
    Fatal(String),
}

impl DbError {
    /// True when this error must abort the ingest run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::Fatal(_))
    }
}

/// Main error type for feedload
#[derive(Error, Debug)]
pub enum FeedloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not match the expected feed format: a required
    /// header tag is missing, or a record cannot be split at all.
    #[error("format error: {0}")]
    Format(String),

    /// The decoded feed schema conflicts with the existing table.
    #[error("schema error: {0}")]
    Schema(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FeedloadError {
    /// Convenience constructor for format errors.
    pub fn format(msg: impl Into<String>) -> Self {
        FeedloadError::Format(msg.into())
    }

    /// Convenience constructor for schema errors.
    pub fn schema(msg: impl Into<String>) -> Self {
        FeedloadError::Schema(msg.into())
    }
}
