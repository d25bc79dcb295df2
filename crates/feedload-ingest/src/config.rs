//! Ingest configuration.
//!
//! Values come from defaults, the environment (`FEEDLOAD_*` variables),
//! or builder-style overrides, in that order of precedence.

use serde::{Deserialize, Serialize};

use feedload_common::{FeedloadError, Result};

use crate::db::Dialect;

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_user() -> String {
    "feedload".to_string()
}

fn default_db_name() -> String {
    "feedload".to_string()
}

fn default_record_delim() -> String {
    "\u{2}\n".to_string()
}

fn default_field_delim() -> String {
    "\u{1}".to_string()
}

fn default_batch_size() -> usize {
    10_000
}

fn default_union_threshold() -> u64 {
    500_000
}

fn default_connections() -> u32 {
    8
}

/// Settings for one ingest run. All fields have working defaults except
/// the database password, which should come from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Database server host.
    pub db_host: String,
    /// Database user.
    pub db_user: String,
    /// Database password.
    pub db_password: String,
    /// Database (catalog) name.
    pub db_name: String,
    /// Backend dialect.
    pub dialect: Dialect,
    /// Prefix joined onto derived table names. A trailing dot makes the
    /// prefix a schema qualifier instead of a name prefix.
    pub table_prefix: Option<String>,
    /// Byte sequence terminating each record.
    pub record_delim: String,
    /// Byte sequence separating fields within a record.
    pub field_delim: String,
    /// Records per INSERT batch.
    pub batch_size: usize,
    /// Expected-record count at or above which incremental ingests use
    /// the staged union-merge strategy instead of in-place updates.
    pub union_threshold: u64,
    /// Database sessions in the connection pool, and the width of the
    /// concurrent batch pool where the dialect allows it.
    pub connections: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            db_host: default_db_host(),
            db_user: default_db_user(),
            db_password: String::new(),
            db_name: default_db_name(),
            dialect: Dialect::default(),
            table_prefix: None,
            record_delim: default_record_delim(),
            field_delim: default_field_delim(),
            batch_size: default_batch_size(),
            union_threshold: default_union_threshold(),
            connections: default_connections(),
        }
    }
}

impl IngestConfig {
    /// Build a configuration from `FEEDLOAD_*` environment variables
    /// layered over the defaults.
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("FEEDLOAD"))
            .build()
            .map_err(|e| FeedloadError::Config(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| FeedloadError::Config(e.to_string()))
    }

    pub fn with_db_host(mut self, host: impl Into<String>) -> Self {
        self.db_host = host.into();
        self
    }

    pub fn with_db_user(mut self, user: impl Into<String>) -> Self {
        self.db_user = user.into();
        self
    }

    pub fn with_db_password(mut self, password: impl Into<String>) -> Self {
        self.db_password = password.into();
        self
    }

    pub fn with_db_name(mut self, name: impl Into<String>) -> Self {
        self.db_name = name.into();
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = Some(prefix.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_union_threshold(mut self, threshold: u64) -> Self {
        self.union_threshold = threshold;
        self
    }

    pub fn with_connections(mut self, connections: u32) -> Self {
        self.connections = connections;
        self
    }

    /// Schema named by the table prefix, if the prefix is a schema
    /// qualifier (contains a dot).
    pub fn schema_name(&self) -> Option<String> {
        let prefix = self.table_prefix.as_deref()?;
        let (schema, _) = prefix.split_once('.')?;
        if schema.is_empty() {
            None
        } else {
            Some(schema.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = IngestConfig::default();
        assert_eq!(cfg.db_host, "localhost");
        assert_eq!(cfg.record_delim, "\u{2}\n");
        assert_eq!(cfg.field_delim, "\u{1}");
        assert_eq!(cfg.batch_size, 10_000);
        assert_eq!(cfg.union_threshold, 500_000);
        assert_eq!(cfg.connections, 8);
        assert_eq!(cfg.dialect, Dialect::Postgresql);
    }

    #[test]
    fn test_builders() {
        let cfg = IngestConfig::default()
            .with_dialect(Dialect::Mysql)
            .with_batch_size(500)
            .with_union_threshold(0)
            .with_table_prefix("feeds.");
        assert_eq!(cfg.dialect, Dialect::Mysql);
        assert_eq!(cfg.batch_size, 500);
        assert_eq!(cfg.union_threshold, 0);
        assert_eq!(cfg.table_prefix.as_deref(), Some("feeds."));
    }

    #[test]
    fn test_schema_name() {
        assert_eq!(
            IngestConfig::default()
                .with_table_prefix("feeds.")
                .schema_name()
                .as_deref(),
            Some("feeds")
        );
        assert_eq!(
            IngestConfig::default()
                .with_table_prefix("prod")
                .schema_name(),
            None
        );
        assert_eq!(IngestConfig::default().schema_name(), None);
    }
}
