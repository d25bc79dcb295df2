//! Table-name derivation from feed file paths.

use std::path::Path;

/// The set of table names used by one ingest: the live table plus the
/// derived working names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    /// Live table the ingest targets.
    pub live: String,
    /// Staging table for full ingests, swapped in on completion.
    pub tmp: String,
    /// Staging table for incremental union merges.
    pub inc: String,
    /// Union table merging live and incremental rows.
    pub union: String,
    /// Previous live table, kept briefly during the swap.
    pub old: String,
}

impl TableNames {
    /// Derive the table names for a feed file.
    ///
    /// The base name is the file name with its extension stripped and
    /// hyphens replaced by underscores. A prefix is joined with an
    /// underscore unless it already ends with a dot, in which case it
    /// acts as a schema qualifier.
    pub fn derive(path: impl AsRef<Path>, prefix: Option<&str>) -> Self {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Everything after the first dot is extension; compressed feeds
        // can carry more than one.
        let stem = file_name.split('.').next().unwrap_or_default();
        let base = stem.replace('-', "_");

        let live = match prefix {
            Some(p) if !p.is_empty() => {
                if p.ends_with('.') {
                    format!("{}{}", p, base)
                } else {
                    format!("{}_{}", p, base)
                }
            }
            _ => base,
        };

        Self {
            tmp: format!("{}_tmp", live),
            inc: format!("{}_inc", live),
            union: format!("{}_un", live),
            old: format!("{}_old", live),
            live,
        }
    }
}
