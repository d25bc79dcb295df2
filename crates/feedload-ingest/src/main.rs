//! Feedload Ingest - feed file ingestion tool

use anyhow::Result;
use clap::Parser;
use feedload_common::logging::{init_logging, LogConfig, LogLevel};
use feedload_ingest::config::IngestConfig;
use feedload_ingest::db::{self, Dialect};
use feedload_ingest::ingest::Ingester;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "feedload-ingest")]
#[command(author, version, about = "Bulk-load compressed feed files into a relational store")]
struct Cli {
    /// Feed files to ingest, in order
    #[arg(required = true)]
    files: Vec<String>,

    /// Database server host
    #[arg(long, default_value = "localhost")]
    db_host: String,

    /// Database user
    #[arg(long, default_value = "feedload")]
    db_user: String,

    /// Database password
    #[arg(long, env = "FEEDLOAD_DB_PASSWORD", default_value = "", hide_env_values = true)]
    db_password: String,

    /// Database name
    #[arg(long, default_value = "feedload")]
    db_name: String,

    /// Backend dialect (postgresql or mysql)
    #[arg(long, default_value = "postgresql")]
    db_type: Dialect,

    /// Table name prefix; end it with '.' to use it as a schema
    #[arg(long)]
    table_prefix: Option<String>,

    /// Resume the first file after this record number; records up to
    /// and including it are skipped
    #[arg(long)]
    resume_from: Option<i64>,

    /// Skip rows violating primary-key constraints instead of logging errors
    #[arg(long)]
    skip_key_violators: bool,

    /// Records per INSERT batch
    #[arg(long, default_value_t = 10_000)]
    batch_size: usize,

    /// Record count at which incremental ingests switch to union merging
    #[arg(long, default_value_t = 500_000)]
    union_threshold: u64,

    /// Database sessions in the connection pool
    #[arg(long, default_value_t = 8)]
    connections: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::new()
        .with_level(log_level)
        .with_file_prefix("feedload-ingest");
    let log_config = LogConfig::from_env().unwrap_or(log_config);
    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::default()
        .with_db_host(cli.db_host)
        .with_db_user(cli.db_user)
        .with_db_password(cli.db_password)
        .with_db_name(cli.db_name)
        .with_dialect(cli.db_type)
        .with_batch_size(cli.batch_size)
        .with_union_threshold(cli.union_threshold)
        .with_connections(cli.connections);
    if let Some(prefix) = cli.table_prefix {
        config = config.with_table_prefix(prefix);
    }

    let db = db::connect(&config).await?;

    let mut failures = Vec::new();
    for (i, file) in cli.files.iter().enumerate() {
        info!(%file, "Processing feed file");
        let mut ingester = match Ingester::open(db.clone(), &config, file) {
            Ok(ingester) => ingester,
            Err(err) => {
                error!(%file, %err, "Could not open feed file");
                failures.push(file.clone());
                continue;
            }
        };

        let resume_from = if i == 0 { cli.resume_from } else { None };
        let outcome = match resume_from {
            Some(from) => ingester.ingest_resume(from, cli.skip_key_violators).await,
            None => ingester.ingest(cli.skip_key_violators).await,
        };

        if let Err(err) = outcome {
            error!(%file, %err, "Ingest failed");
            match serde_json::to_string(&ingester.status()) {
                Ok(status) => error!(status = %status, "Ingest status at failure"),
                Err(ser_err) => error!(%ser_err, "Could not serialize ingest status"),
            }
            failures.push(file.clone());
        }
    }

    if failures.is_empty() {
        info!("All feed files ingested");
        Ok(())
    } else {
        error!(count = failures.len(), files = ?failures, "Some feed files failed to ingest");
        anyhow::bail!("{} of {} feed files failed", failures.len(), cli.files.len());
    }
}
