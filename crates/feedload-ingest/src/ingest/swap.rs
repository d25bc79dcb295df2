//! Atomic-enough table swaps: staging replaces live via renames.

use std::sync::Arc;

use feedload_common::Result;
use tracing::{error, info, warn};

use crate::db::{self, Dialect, SqlExecutor};

/// Swaps a fully-populated staging table into place of the live table.
pub struct TableSwapper {
    db: Arc<dyn SqlExecutor>,
    dialect: Dialect,
    database: String,
}

impl TableSwapper {
    pub fn new(db: Arc<dyn SqlExecutor>, dialect: Dialect, database: impl Into<String>) -> Self {
        Self {
            db,
            dialect,
            database: database.into(),
        }
    }

    /// Replace `target` with `source` via renames.
    ///
    /// The displaced live table is parked under `old` for the duration
    /// of the swap and dropped once the new table is in place, so a
    /// reader sees either the old table or the new one. On failure the
    /// displaced table is moved back if possible and the error is
    /// returned; the live table is never silently lost.
    ///
    /// `has_pk_index` says whether the tables carry a named primary-key
    /// index that must be renamed alongside them (only meaningful where
    /// the dialect exposes such indexes).
    pub async fn swap(
        &self,
        source: &str,
        target: &str,
        old: &str,
        has_pk_index: bool,
    ) -> Result<()> {
        let rename_indexes = has_pk_index && self.dialect.has_named_pk_index();

        // A parked table from an earlier failed swap would block the rename.
        self.drop_if_exists(old).await?;

        let target_existed = db::table_exists(&*self.db, self.dialect, &self.database, target).await?;
        if target_existed {
            self.rename(target, old, rename_indexes).await?;
        }

        if let Err(err) = self.rename(source, target, rename_indexes).await {
            error!(%source, %target, "Swap failed; restoring previous table");
            if target_existed {
                if let Err(revert_err) = self.rename(old, target, rename_indexes).await {
                    error!(%revert_err, "Could not restore previous table after failed swap");
                }
            }
            return Err(err);
        }

        if target_existed {
            self.drop_if_exists(old).await?;
        }
        info!(%target, "Table swap complete");
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str, rename_indexes: bool) -> Result<()> {
        self.db
            .execute(&self.dialect.rename_table_sql(from, to))
            .await?;
        if rename_indexes {
            let from_idx = format!("{}_pk", from);
            let to_idx = format!("{}_pk", to);
            if let Some(sql) = self.dialect.rename_index_sql(&from_idx, &to_idx) {
                if let Err(err) = self.db.execute(&sql).await {
                    // An index rename failing leaves a stale name, not a
                    // broken table.
                    warn!(%err, %from_idx, "Primary-key index rename failed");
                }
            }
        }
        Ok(())
    }

    async fn drop_if_exists(&self, table: &str) -> Result<()> {
        if db::table_exists(&*self.db, self.dialect, &self.database, table).await? {
            db::execute_ignore_warnings(&*self.db, &format!("DROP TABLE IF EXISTS {}", table))
                .await?;
        }
        Ok(())
    }
}
