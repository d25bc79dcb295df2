//! Database access: dialect capabilities and a thin SQL execution seam.
//!
//! All ingest SQL flows through [`SqlExecutor`], which hides the
//! backend behind two async calls. Errors are classified into the
//! three-way [`DbError`] severity so callers can decide what aborts an
//! ingest and what merely gets logged.

pub mod dialect;

use std::sync::Arc;

use async_trait::async_trait;
use feedload_common::{DbError, FeedloadError, Result};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::{MySqlPool, PgPool, Row as _};
use tracing::{debug, warn};

pub use dialect::Dialect;

use crate::config::IngestConfig;

/// Executes ingest SQL against one backend.
///
/// Statements carry pre-escaped literals, so implementations run them
/// verbatim. Each call may use any pooled session; the ingest pipeline
/// never relies on session state.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a statement, returning the affected row count.
    async fn execute(&self, sql: &str) -> std::result::Result<u64, DbError>;

    /// Run a single-value query and return its first column as i64.
    async fn fetch_i64(&self, sql: &str) -> std::result::Result<i64, DbError>;
}

/// Map a driver error to the three-way ingest severity.
///
/// Key violations (SQLSTATE 23505 / 23000, MySQL errno 1062) are
/// expected during skip-conflict loads and stay non-fatal. Everything
/// else aborts the operation that raised it.
fn classify(err: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(db_err) = &err {
        let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
        if code == "23505" || code == "23000" || code == "1062" {
            return DbError::IntegrityViolation(db_err.to_string());
        }
    }
    DbError::Fatal(err.to_string())
}

/// [`SqlExecutor`] backed by a PostgreSQL connection pool.
pub struct PgExecutor {
    pool: PgPool,
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute(&self, sql: &str) -> std::result::Result<u64, DbError> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(classify)
    }

    async fn fetch_i64(&self, sql: &str) -> std::result::Result<i64, DbError> {
        let row = sqlx::query(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        row.try_get::<i64, _>(0)
            .map_err(|e| DbError::Fatal(e.to_string()))
    }
}

/// [`SqlExecutor`] backed by a MySQL connection pool.
pub struct MySqlExecutor {
    pool: MySqlPool,
}

#[async_trait]
impl SqlExecutor for MySqlExecutor {
    async fn execute(&self, sql: &str) -> std::result::Result<u64, DbError> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(classify)
    }

    async fn fetch_i64(&self, sql: &str) -> std::result::Result<i64, DbError> {
        let row = sqlx::query(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        row.try_get::<i64, _>(0)
            .map_err(|e| DbError::Fatal(e.to_string()))
    }
}

/// Connect to the configured backend and return an executor for it.
///
/// The pool is sized to the configured session count. For PostgreSQL,
/// if the table prefix names a schema (it contains a dot), the
/// session search path is pointed at that schema so unqualified table
/// names resolve there.
pub async fn connect(config: &IngestConfig) -> Result<Arc<dyn SqlExecutor>> {
    match config.dialect {
        Dialect::Postgresql => {
            let url = format!(
                "postgres://{}:{}@{}/{}",
                config.db_user, config.db_password, config.db_host, config.db_name
            );
            let schema = config.schema_name();
            let mut options = PgPoolOptions::new().max_connections(config.connections);
            if let Some(schema) = schema {
                let set_path = format!("SET search_path TO {}", schema);
                options = options.after_connect(move |conn, _meta| {
                    let set_path = set_path.clone();
                    Box::pin(async move {
                        sqlx::Executor::execute(conn, set_path.as_str()).await?;
                        Ok(())
                    })
                });
            }
            let pool = options
                .connect(&url)
                .await
                .map_err(|e| FeedloadError::Db(DbError::Fatal(e.to_string())))?;
            debug!(host = %config.db_host, db = %config.db_name, "Connected to PostgreSQL");
            Ok(Arc::new(PgExecutor { pool }))
        }
        Dialect::Mysql => {
            let url = format!(
                "mysql://{}:{}@{}/{}",
                config.db_user, config.db_password, config.db_host, config.db_name
            );
            let pool = MySqlPoolOptions::new()
                .max_connections(config.connections)
                .connect(&url)
                .await
                .map_err(|e| FeedloadError::Db(DbError::Fatal(e.to_string())))?;
            debug!(host = %config.db_host, db = %config.db_name, "Connected to MySQL");
            Ok(Arc::new(MySqlExecutor { pool }))
        }
    }
}

/// Strip a leading schema qualifier for catalog comparisons; the
/// information_schema views match on the bare table name.
fn bare_table_name(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

/// Whether `table` exists in the connected database.
pub async fn table_exists(
    db: &dyn SqlExecutor,
    dialect: Dialect,
    database: &str,
    table: &str,
) -> Result<bool> {
    let count = db
        .fetch_i64(&dialect.table_exists_sql(database, bare_table_name(table)))
        .await?;
    Ok(count > 0)
}

/// Number of columns of `table` per the catalog.
pub async fn column_count(
    db: &dyn SqlExecutor,
    dialect: Dialect,
    database: &str,
    table: &str,
) -> Result<u64> {
    let count = db
        .fetch_i64(&dialect.column_count_sql(database, bare_table_name(table)))
        .await?;
    Ok(count.max(0) as u64)
}

/// Run a statement, downgrading warning-grade failures to a log line.
/// Fatal errors still propagate.
pub async fn execute_ignore_warnings(db: &dyn SqlExecutor, sql: &str) -> Result<u64> {
    match db.execute(sql).await {
        Ok(affected) => Ok(affected),
        Err(DbError::Warning(msg)) => {
            warn!(%msg, "Ignoring warning from statement");
            Ok(0)
        }
        Err(err) => Err(err.into()),
    }
}
