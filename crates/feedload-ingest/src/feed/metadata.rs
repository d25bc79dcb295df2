//! Feed header metadata and decoded row types.

use serde::{Deserialize, Serialize};

/// A decoded data record: field values aligned to the feed's columns.
/// `None` is a SQL NULL; primary-key fields are never `None` (empty
/// primary-key values stay empty strings so the key remains comparable).
pub type Row = Vec<Option<String>>;

/// Export mode declared in the feed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportMode {
    /// The feed carries a complete snapshot of the table.
    Full,
    /// The feed carries rows superseding those in an existing table.
    Incremental,
}

impl ExportMode {
    /// Parse the header tag value. Anything other than the incremental
    /// marker is treated as a full export.
    pub fn from_tag(value: &str) -> Self {
        if value.eq_ignore_ascii_case("INCREMENTAL") {
            ExportMode::Incremental
        } else {
            ExportMode::Full
        }
    }
}

/// Declared type names that hold date/time values and need textual
/// normalization before insert.
pub const DATE_TYPES: &[&str] = &["DATE", "DATETIME", "TIME", "TIMESTAMP"];

/// Declared type names that hold numeric values and need sanitization
/// of stray non-numeric characters.
pub const NUMBER_TYPES: &[&str] = &["INTEGER", "INT", "BIGINT", "TINYINT"];

/// Structured header metadata extracted from the first records of a feed.
#[derive(Debug, Clone)]
pub struct FeedMetadata {
    /// Ordered column names (unique).
    pub column_names: Vec<String>,
    /// Declared data types, 1:1 with `column_names`, after feed-specific
    /// overrides and the dialect type remap.
    pub data_types: Vec<String>,
    /// Primary-key column names (subset of `column_names`, possibly empty).
    pub primary_key: Vec<String>,
    /// Indexes of the primary-key columns within `column_names`.
    pub primary_key_indexes: Vec<usize>,
    /// Export mode declared in the header.
    pub export_mode: ExportMode,
    /// Record count estimated from the compressed file size. A strategy
    /// heuristic only; never trusted for correctness.
    pub records_expected: u64,
    /// Indexes of columns classified as date/time types.
    pub date_columns: Vec<usize>,
    /// Indexes of columns classified as numeric types.
    pub number_columns: Vec<usize>,
}

impl FeedMetadata {
    /// Trim the decoded schema to `count` columns. Used when the target
    /// table has fewer columns than the feed declares: extra trailing
    /// feed columns are dropped, never an error.
    pub fn trim_columns(&mut self, count: usize) {
        self.column_names.truncate(count);
    }
}
