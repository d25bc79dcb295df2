//! Test doubles and fixtures for ingest flow tests.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use feedload_common::DbError;
use feedload_ingest::db::SqlExecutor;

pub const RECORD_DELIM: &str = "\x02\n";
pub const FIELD_DELIM: &str = "\x01";

/// Write a synthetic feed file: 512-byte container block, header, rows.
pub fn feed_file(
    name: &str,
    columns: &[&str],
    types: &[&str],
    primary_key: &[&str],
    export_mode: &str,
    records: &[Vec<&str>],
) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);

    let mut body = String::new();
    body.push_str(&format!("#{}{}", columns.join(FIELD_DELIM), RECORD_DELIM));
    body.push_str(&format!(
        "#primaryKey:{}{}",
        primary_key.join(FIELD_DELIM),
        RECORD_DELIM
    ));
    body.push_str(&format!("#dbTypes:{}{}", types.join(FIELD_DELIM), RECORD_DELIM));
    body.push_str(&format!("#exportMode:{}{}", export_mode, RECORD_DELIM));
    for record in records {
        body.push_str(&format!("{}{}", record.join(FIELD_DELIM), RECORD_DELIM));
    }

    let mut data = vec![b'x'; 512];
    data.extend_from_slice(body.as_bytes());
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&data).unwrap();

    (dir, path)
}

#[derive(Debug, Clone, Default)]
pub struct MockTable {
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl MockTable {
    fn key_of(&self, row: &[Option<String>]) -> Vec<Option<String>> {
        self.primary_key
            .iter()
            .filter_map(|pk| self.columns.iter().position(|c| c == pk))
            .filter_map(|i| row.get(i).cloned())
            .collect()
    }
}

/// In-memory stand-in for a SQL backend, just smart enough to execute
/// the statements the ingest pipeline generates.
#[derive(Default)]
pub struct MockDb {
    pub tables: Mutex<HashMap<String, MockTable>>,
    pub statements: Mutex<Vec<String>>,
    pub fail_on: Mutex<Option<String>>,
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a table, as though an earlier full ingest built it.
    pub fn seed_table(&self, name: &str, columns: &[&str], primary_key: &[&str], rows: &[Vec<Option<&str>>]) {
        let table = MockTable {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            primary_key: primary_key.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|v| v.map(str::to_string)).collect())
                .collect(),
        };
        self.tables.lock().unwrap().insert(name.to_string(), table);
    }

    pub fn set_fail_on(&self, needle: &str) {
        *self.fail_on.lock().unwrap() = Some(needle.to_string());
    }

    pub fn clear_fail_on(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    pub fn table(&self, name: &str) -> Option<MockTable> {
        self.tables.lock().unwrap().get(name).cloned()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    fn bare(name: &str) -> &str {
        name.rsplit('.').next().unwrap_or(name)
    }

    fn apply(&self, sql: &str) -> Result<u64, DbError> {
        let mut tables = self.tables.lock().unwrap();

        if let Some(rest) = sql.strip_prefix("DROP TABLE IF EXISTS ") {
            tables.remove(rest.trim());
            return Ok(0);
        }
        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            let (name, tail) = rest
                .split_once(' ')
                .ok_or_else(|| DbError::Fatal(format!("bad create: {}", sql)))?;
            if tables.contains_key(name) {
                return Err(DbError::Fatal(format!("table {} already exists", name)));
            }
            let table = if tail.starts_with('(') {
                let body = tail
                    .strip_prefix('(')
                    .and_then(|t| t.strip_suffix(')'))
                    .ok_or_else(|| DbError::Fatal(format!("bad create body: {}", sql)))?;
                let columns = body
                    .split(", ")
                    .map(|pair| pair.split_whitespace().next().unwrap_or("").to_string())
                    .collect();
                MockTable {
                    columns,
                    ..Default::default()
                }
            } else {
                // CREATE TABLE ... AS/IGNORE SELECT: the select itself is
                // not evaluated, only the table's existence is tracked.
                MockTable::default()
            };
            tables.insert(name.to_string(), table);
            return Ok(0);
        }
        if sql.starts_with("ALTER INDEX ") {
            return Ok(0);
        }
        if sql.starts_with("CREATE INDEX ") || sql.starts_with("ANALYZE") {
            return Ok(0);
        }
        if let Some(rest) = sql.strip_prefix("ALTER TABLE ") {
            if let Some(idx) = rest.find(" ADD CONSTRAINT ") {
                let name = &rest[..idx];
                let pk_body = rest
                    .split_once("PRIMARY KEY (")
                    .and_then(|(_, t)| t.strip_suffix(')'))
                    .ok_or_else(|| DbError::Fatal(format!("bad constraint: {}", sql)))?;
                let table = tables
                    .get_mut(name)
                    .ok_or_else(|| DbError::Fatal(format!("no such table {}", name)))?;
                table.primary_key = pk_body.split(", ").map(|c| c.trim().to_string()).collect();
                return Ok(0);
            }
            let (from, to) = rest
                .split_once(" RENAME TO ")
                .or_else(|| rest.split_once(" RENAME "))
                .ok_or_else(|| DbError::Fatal(format!("bad alter: {}", sql)))?;
            let table = tables
                .remove(from)
                .ok_or_else(|| DbError::Fatal(format!("no such table {}", from)))?;
            // the rename target may be unqualified even when the source
            // carries a schema
            let to_full = if from.contains('.') && !to.contains('.') {
                format!("{}.{}", from.rsplit_once('.').map(|(s, _)| s).unwrap_or(""), to)
            } else {
                to.to_string()
            };
            tables.insert(to_full, table);
            return Ok(0);
        }

        let (command, rest) = if let Some(rest) = sql.strip_prefix("REPLACE INTO ") {
            ("replace", rest)
        } else if let Some(rest) = sql.strip_prefix("INSERT IGNORE INTO ") {
            ("skip", rest)
        } else if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
            if sql.contains(" ON CONFLICT ") {
                ("skip", rest)
            } else {
                ("append", rest)
            }
        } else {
            return Err(DbError::Fatal(format!("unhandled statement: {}", sql)));
        };

        let (name, tail) = rest
            .split_once(" (")
            .ok_or_else(|| DbError::Fatal(format!("bad insert: {}", sql)))?;
        let (col_body, values_tail) = tail
            .split_once(") VALUES ")
            .ok_or_else(|| DbError::Fatal(format!("bad insert: {}", sql)))?;
        let insert_columns: Vec<String> = col_body.split(", ").map(str::to_string).collect();

        let table = tables
            .get_mut(name)
            .ok_or_else(|| DbError::Fatal(format!("no such table {}", name)))?;
        let rows = parse_value_lists(values_tail)
            .map_err(|e| DbError::Fatal(format!("{}: {}", e, sql)))?;

        let mut affected = 0;
        for values in rows {
            if values.len() != insert_columns.len() {
                return Err(DbError::Fatal(format!(
                    "column/value count mismatch in: {}",
                    sql
                )));
            }
            // align values to the table's column order
            let mut row: Vec<Option<String>> = vec![None; table.columns.len()];
            for (col, value) in insert_columns.iter().zip(values) {
                let idx = table
                    .columns
                    .iter()
                    .position(|c| c == col)
                    .ok_or_else(|| DbError::Fatal(format!("no column {} in {}", col, name)))?;
                row[idx] = value;
            }
            let key = table.key_of(&row);
            let existing = if key.is_empty() {
                None
            } else {
                table.rows.iter().position(|r| table.key_of(r) == key)
            };
            match (existing, command) {
                (Some(_), "skip") => continue,
                (Some(i), "replace") => {
                    table.rows[i] = row;
                    affected += 1;
                }
                (Some(_), _) => {
                    return Err(DbError::IntegrityViolation(format!(
                        "duplicate key in {}",
                        name
                    )))
                }
                (None, _) => {
                    table.rows.push(row);
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }
}

/// Parse `('a', NULL, 'b''c'), (...)` into rows of optional strings.
fn parse_value_lists(input: &str) -> Result<Vec<Vec<Option<String>>>, String> {
    let body = match input.split_once(" ON CONFLICT ") {
        Some((before, _)) => before,
        None => input,
    };
    let mut rows = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '(' {
            continue;
        }
        let mut row = Vec::new();
        loop {
            while chars.peek() == Some(&' ') || chars.peek() == Some(&',') {
                chars.next();
            }
            match chars.peek() {
                Some(')') => {
                    chars.next();
                    break;
                }
                Some('\'') => {
                    chars.next();
                    let mut value = String::new();
                    loop {
                        match chars.next() {
                            Some('\\') => match chars.next() {
                                Some(escaped) => value.push(escaped),
                                None => return Err("unterminated escape".to_string()),
                            },
                            Some('\'') => {
                                if chars.peek() == Some(&'\'') {
                                    chars.next();
                                    value.push('\'');
                                } else {
                                    break;
                                }
                            }
                            Some(other) => value.push(other),
                            None => return Err("unterminated literal".to_string()),
                        }
                    }
                    row.push(Some(value));
                }
                Some('N') => {
                    for _ in 0..4 {
                        chars.next();
                    }
                    row.push(None);
                }
                Some('E') => {
                    // extended-escape literal marker; the quoted body follows
                    chars.next();
                }
                other => return Err(format!("unexpected token {:?}", other)),
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

#[async_trait]
impl SqlExecutor for MockDb {
    async fn execute(&self, sql: &str) -> Result<u64, DbError> {
        self.statements.lock().unwrap().push(sql.to_string());
        let fail_on = self.fail_on.lock().unwrap().clone();
        if let Some(needle) = fail_on {
            if sql.contains(&needle) {
                return Err(DbError::Fatal(format!("injected failure on: {}", sql)));
            }
        }
        self.apply(sql)
    }

    async fn fetch_i64(&self, sql: &str) -> Result<i64, DbError> {
        self.statements.lock().unwrap().push(sql.to_string());
        let tables = self.tables.lock().unwrap();
        let name = sql
            .rsplit("table_name = '")
            .next()
            .and_then(|t| t.split('\'').next())
            .unwrap_or("");
        if sql.contains("information_schema.tables") {
            let count = tables.keys().filter(|k| Self::bare(k) == name).count();
            return Ok(count as i64);
        }
        if sql.contains("information_schema.columns") {
            let count = tables
                .iter()
                .find(|(k, _)| Self::bare(k) == name)
                .map(|(_, t)| t.columns.len())
                .unwrap_or(0);
            return Ok(count as i64);
        }
        Err(DbError::Fatal(format!("unhandled query: {}", sql)))
    }
}
