//! Multi-row insert assembly and concurrent batch dispatch.

use std::collections::HashSet;
use std::sync::Arc;

use feedload_common::{DbError, FeedloadError, Result};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::db::{Dialect, SqlExecutor};
use crate::feed::{FeedMetadata, Row};

/// How a batch lands on rows whose primary key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Plain insert; a key conflict is an integrity violation.
    Append,
    /// Rows conflicting on the primary key are skipped.
    SkipConflicts,
    /// Rows conflicting on the primary key replace the existing row.
    Replace,
}

impl WriteDisposition {
    /// Pick the disposition for an ingest. Native replace is only
    /// available where the dialect has a REPLACE form; elsewhere
    /// incremental loads fall back to conflict skipping.
    pub fn resolve(dialect: Dialect, incremental: bool, skip_key_violators: bool) -> Self {
        if incremental && dialect.supports_native_replace() {
            WriteDisposition::Replace
        } else if skip_key_violators {
            WriteDisposition::SkipConflicts
        } else {
            WriteDisposition::Append
        }
    }
}

/// Builds multi-row insert statements for one feed schema.
pub struct BatchWriter {
    dialect: Dialect,
    disposition: WriteDisposition,
    column_names: Vec<String>,
    primary_key: Vec<String>,
    primary_key_indexes: Vec<usize>,
}

impl BatchWriter {
    pub fn new(dialect: Dialect, disposition: WriteDisposition, metadata: &FeedMetadata) -> Self {
        Self {
            dialect,
            disposition,
            column_names: metadata.column_names.clone(),
            primary_key: metadata.primary_key.clone(),
            primary_key_indexes: metadata.primary_key_indexes.clone(),
        }
    }

    /// Assemble one multi-row statement for `rows`, or `None` for an
    /// empty batch.
    ///
    /// When the feed has a primary key, rows duplicated on the key
    /// within the batch are collapsed to the last occurrence, since a
    /// later row supersedes an earlier one within the same export.
    /// Without a primary key every row is kept.
    pub fn insert_statement(&self, table: &str, rows: &[Row]) -> Option<String> {
        let kept = self.dedup_keep_last(rows);
        if kept.is_empty() {
            return None;
        }

        let command = match self.disposition {
            WriteDisposition::Replace => "REPLACE",
            WriteDisposition::Append | WriteDisposition::SkipConflicts => "INSERT",
        };
        let ignore = if self.disposition == WriteDisposition::SkipConflicts
            && self.dialect.supports_native_replace()
        {
            " IGNORE"
        } else {
            ""
        };

        let mut sql = format!(
            "{}{} INTO {} ({}) VALUES ",
            command,
            ignore,
            table,
            self.column_names.join(", ")
        );
        for (i, row) in kept.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for (j, value) in row.iter().take(self.column_names.len()).enumerate() {
                if j > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&self.dialect.escape_literal(value.as_deref()));
            }
            sql.push(')');
        }

        if self.disposition == WriteDisposition::SkipConflicts
            && !self.dialect.supports_native_replace()
            && !self.primary_key.is_empty()
        {
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO NOTHING",
                self.primary_key.join(",")
            ));
        }

        Some(sql)
    }

    fn dedup_keep_last<'a>(&self, rows: &'a [Row]) -> Vec<&'a Row> {
        if self.primary_key_indexes.is_empty() {
            return rows.iter().collect();
        }
        let mut seen: HashSet<Vec<&Option<String>>> = HashSet::new();
        let mut kept_rev: Vec<&Row> = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            let key: Vec<&Option<String>> = self
                .primary_key_indexes
                .iter()
                .filter_map(|&i| row.get(i))
                .collect();
            if seen.insert(key) {
                kept_rev.push(row);
            }
        }
        kept_rev.reverse();
        kept_rev
    }
}

/// Fixed-width pool of in-flight batch statements.
///
/// Dispatch busy-polls the slots round-robin, yielding to the runtime
/// between sweeps, until one frees up. This deliberately trades a
/// little scheduler churn for strictly bounded in-flight statements
/// and strictly ordered dispatch.
///
/// A fatal error surfacing at dispatch time aborts the ingest. Drain
/// behavior is caller-chosen: a concurrent pool drains leniently (its
/// remaining statements were already dispatched, so late failures are
/// only logged), while a sequential pool must surface them — there the
/// drained statement is the final one of the run, and swallowing its
/// failure would ship an incomplete table as a success.
pub struct BatchPool {
    db: Arc<dyn SqlExecutor>,
    slots: Vec<Option<JoinHandle<std::result::Result<u64, DbError>>>>,
    next: usize,
}

impl BatchPool {
    pub fn new(db: Arc<dyn SqlExecutor>, width: usize) -> Self {
        Self {
            db,
            slots: (0..width.max(1)).map(|_| None).collect(),
            next: 0,
        }
    }

    /// Dispatch one statement, waiting for a free slot first.
    pub async fn dispatch(&mut self, sql: String) -> Result<()> {
        let slot = self.acquire_slot().await?;
        let db = Arc::clone(&self.db);
        self.slots[slot] = Some(tokio::spawn(async move { db.execute(&sql).await }));
        self.next = (slot + 1) % self.slots.len();
        Ok(())
    }

    async fn acquire_slot(&mut self) -> Result<usize> {
        loop {
            for offset in 0..self.slots.len() {
                let idx = (self.next + offset) % self.slots.len();
                let finished = match &self.slots[idx] {
                    None => return Ok(idx),
                    Some(handle) => handle.is_finished(),
                };
                if finished {
                    if let Some(handle) = self.slots[idx].take() {
                        Self::settle(handle, true).await?;
                    }
                    return Ok(idx);
                }
            }
            tokio::task::yield_now().await;
        }
    }

    /// Wait out all in-flight statements. With `raise_fatal` set, a
    /// fatal failure aborts the drain; otherwise failures are logged
    /// and the drain completes.
    pub async fn drain(&mut self, raise_fatal: bool) -> Result<()> {
        for slot in &mut self.slots {
            if let Some(handle) = slot.take() {
                Self::settle(handle, raise_fatal).await?;
            }
        }
        Ok(())
    }

    async fn settle(
        handle: JoinHandle<std::result::Result<u64, DbError>>,
        raise_fatal: bool,
    ) -> Result<()> {
        let outcome = handle
            .await
            .map_err(|e| FeedloadError::Db(DbError::Fatal(format!("batch task failed: {}", e))))?;
        match outcome {
            Ok(_) => Ok(()),
            Err(err) if err.is_fatal() && raise_fatal => Err(err.into()),
            Err(err) if err.is_fatal() => {
                error!(%err, "Batch statement failed during drain");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "Batch statement reported a non-fatal error");
                Ok(())
            }
        }
    }
}
