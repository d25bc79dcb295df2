//! SQL dialect capabilities.
//!
//! All dialect-specific behavior is dispatched through this enum:
//! literal escaping, native replace-on-conflict support, concurrent
//! batch execution, rename statement shapes, index renames, the
//! feed-to-backend type remap, and catalog introspection SQL.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use feedload_common::FeedloadError;

/// Relational backend dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    #[serde(alias = "postgres")]
    Postgresql,
    Mysql,
}

impl Dialect {
    /// Remap of declared feed type names to backend type names, applied
    /// after the feed-specific overrides.
    pub fn type_remap(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Dialect::Postgresql => &[
                ("VARCHAR(1000)", "TEXT"),
                ("VARCHAR(4000)", "TEXT"),
                ("CLOB", "LONGTEXT"),
                ("DATETIME", "TIMESTAMP"),
                ("LONGTEXT", "TEXT"),
            ],
            Dialect::Mysql => &[("CLOB", "LONGTEXT")],
        }
    }

    /// Whether the backend has a native REPLACE form for key conflicts.
    pub fn supports_native_replace(&self) -> bool {
        matches!(self, Dialect::Mysql)
    }

    /// Whether batches may be dispatched to a pool of concurrent sessions.
    pub fn supports_concurrent_batches(&self) -> bool {
        matches!(self, Dialect::Postgresql)
    }

    /// Whether incremental ingests always update the live table in
    /// place. Large primary-key-conflict merges are pathologically slow
    /// on this backend, so the union-merge path is never taken.
    pub fn forces_in_place_incremental(&self) -> bool {
        matches!(self, Dialect::Postgresql)
    }

    /// Whether primary-key indexes are separate renameable objects.
    pub fn has_named_pk_index(&self) -> bool {
        matches!(self, Dialect::Postgresql)
    }

    /// Escape a field value as a store-safe literal. `None` is NULL.
    pub fn escape_literal(&self, value: Option<&str>) -> String {
        let Some(value) = value else {
            return "NULL".to_string();
        };
        match self {
            Dialect::Postgresql => {
                if value.contains('\\') {
                    let escaped = value.replace('\\', "\\\\").replace('\'', "''");
                    format!("E'{}'", escaped)
                } else {
                    format!("'{}'", value.replace('\'', "''"))
                }
            }
            Dialect::Mysql => {
                let mut escaped = String::with_capacity(value.len() + 2);
                escaped.push('\'');
                for c in value.chars() {
                    match c {
                        '\\' => escaped.push_str("\\\\"),
                        '\'' => escaped.push_str("\\'"),
                        '"' => escaped.push_str("\\\""),
                        '\n' => escaped.push_str("\\n"),
                        '\r' => escaped.push_str("\\r"),
                        '\0' => escaped.push_str("\\0"),
                        '\x1a' => escaped.push_str("\\Z"),
                        other => escaped.push(other),
                    }
                }
                escaped.push('\'');
                escaped
            }
        }
    }

    /// Statement renaming a table. The PostgreSQL rename target must be
    /// unqualified; the table stays in its schema.
    pub fn rename_table_sql(&self, from: &str, to: &str) -> String {
        match self {
            Dialect::Postgresql => {
                let bare = to.rsplit('.').next().unwrap_or(to);
                format!("ALTER TABLE {} RENAME TO {}", from, bare)
            }
            Dialect::Mysql => format!("ALTER TABLE {} RENAME {}", from, to),
        }
    }

    /// Statement renaming an index, when the backend supports it. As
    /// with table renames, the target is unqualified.
    pub fn rename_index_sql(&self, from: &str, to: &str) -> Option<String> {
        match self {
            Dialect::Postgresql => {
                let bare = to.rsplit('.').next().unwrap_or(to);
                Some(format!("ALTER INDEX {} RENAME TO {}", from, bare))
            }
            Dialect::Mysql => None,
        }
    }

    /// Statement adding the primary-key constraint to a table. The
    /// constraint name is derived from the bare table name; constraint
    /// identifiers cannot carry a schema qualifier.
    pub fn add_primary_key_sql(&self, table: &str, columns: &[String]) -> String {
        let cols = columns.join(", ");
        let bare = table.rsplit('.').next().unwrap_or(table);
        match self {
            Dialect::Postgresql => format!(
                "ALTER TABLE {} ADD CONSTRAINT {}_pk PRIMARY KEY ({})",
                table, bare, cols
            ),
            Dialect::Mysql => {
                format!("ALTER TABLE {} ADD CONSTRAINT PRIMARY KEY ({})", table, cols)
            }
        }
    }

    /// Catalog query counting matches for a table name; non-zero means
    /// the table exists.
    pub fn table_exists_sql(&self, database: &str, table: &str) -> String {
        match self {
            Dialect::Postgresql => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_catalog = {} AND table_name = {}",
                self.escape_literal(Some(database)),
                self.escape_literal(Some(table))
            ),
            Dialect::Mysql => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = {} AND table_name = {}",
                self.escape_literal(Some(database)),
                self.escape_literal(Some(table))
            ),
        }
    }

    /// Catalog query counting the columns of a table.
    pub fn column_count_sql(&self, database: &str, table: &str) -> String {
        match self {
            Dialect::Postgresql => format!(
                "SELECT COUNT(*) FROM information_schema.columns WHERE table_name = {}",
                self.escape_literal(Some(table))
            ),
            Dialect::Mysql => format!(
                "SELECT COUNT(*) FROM information_schema.columns \
                 WHERE table_schema = {} AND table_name = {}",
                self.escape_literal(Some(database)),
                self.escape_literal(Some(table))
            ),
        }
    }

    /// Statement creating a table from a SELECT.
    pub fn create_table_as_sql(&self, table: &str, select: &str) -> String {
        match self {
            Dialect::Postgresql => format!("CREATE TABLE {} AS {}", table, select),
            Dialect::Mysql => format!("CREATE TABLE {} {}", table, select),
        }
    }

    /// Statement recomputing planner statistics for a table.
    pub fn analyze_sql(&self, table: &str) -> String {
        match self {
            Dialect::Postgresql => format!("ANALYZE {}", table),
            Dialect::Mysql => format!("ANALYZE TABLE {}", table),
        }
    }
}

impl FromStr for Dialect {
    type Err = FeedloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(Dialect::Postgresql),
            "mysql" => Ok(Dialect::Mysql),
            other => Err(FeedloadError::Config(format!("unknown dialect: {}", other))),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Postgresql => write!(f, "postgresql"),
            Dialect::Mysql => write!(f, "mysql"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_literal_null() {
        assert_eq!(Dialect::Postgresql.escape_literal(None), "NULL");
        assert_eq!(Dialect::Mysql.escape_literal(None), "NULL");
    }

    #[test]
    fn test_escape_literal_postgres() {
        assert_eq!(
            Dialect::Postgresql.escape_literal(Some("it's")),
            "'it''s'"
        );
        assert_eq!(
            Dialect::Postgresql.escape_literal(Some("a\\b'c")),
            "E'a\\\\b''c'"
        );
    }

    #[test]
    fn test_escape_literal_mysql() {
        assert_eq!(Dialect::Mysql.escape_literal(Some("it's")), "'it\\'s'");
        assert_eq!(Dialect::Mysql.escape_literal(Some("a\nb")), "'a\\nb'");
        assert_eq!(Dialect::Mysql.escape_literal(Some("a\\b")), "'a\\\\b'");
    }

    #[test]
    fn test_rename_statement_shapes() {
        assert_eq!(
            Dialect::Postgresql.rename_table_sql("a", "b"),
            "ALTER TABLE a RENAME TO b"
        );
        assert_eq!(
            Dialect::Mysql.rename_table_sql("a", "b"),
            "ALTER TABLE a RENAME b"
        );
        assert!(Dialect::Postgresql.rename_index_sql("a_pk", "b_pk").is_some());
        assert!(Dialect::Mysql.rename_index_sql("a_pk", "b_pk").is_none());
    }

    #[test]
    fn test_type_remap() {
        let remap = Dialect::Postgresql.type_remap();
        assert!(remap.contains(&("DATETIME", "TIMESTAMP")));
        assert!(remap.contains(&("VARCHAR(4000)", "TEXT")));
        assert_eq!(Dialect::Mysql.type_remap(), &[("CLOB", "LONGTEXT")]);
    }

    #[test]
    fn test_parse() {
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::Postgresql);
        assert_eq!("MySQL".parse::<Dialect>().unwrap(), Dialect::Mysql);
        assert!("oracle".parse::<Dialect>().is_err());
    }
}
