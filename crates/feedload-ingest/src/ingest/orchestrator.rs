//! Ingest orchestration: strategy selection, table lifecycle, and
//! progress tracking for one feed file.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use feedload_common::{FeedloadError, Result};
use tracing::{error, info, warn};

use crate::config::IngestConfig;
use crate::db::{self, Dialect, SqlExecutor};
use crate::feed::{ExportMode, FeedParser};
use crate::ingest::naming::TableNames;
use crate::ingest::status::{IngestStatus, JobState};
use crate::ingest::swap::TableSwapper;
use crate::ingest::writer::{BatchPool, BatchWriter, WriteDisposition};

/// Records between progress checkpoints.
const RECORD_GAP: i64 = 5_000;
/// Minimum wall-clock time between progress checkpoints.
const TIME_GAP: Duration = Duration::from_secs(120);

/// Ingests one feed file into the database.
///
/// Strategy is picked from the feed's export mode and size: full
/// exports build a staging table and swap it in; incremental exports
/// either update the live table in place or stage and union-merge,
/// whichever the dialect and record count favor.
pub struct Ingester {
    db: Arc<dyn SqlExecutor>,
    config: IngestConfig,
    parser: FeedParser,
    names: TableNames,
    source: String,
    file_name: String,
    index_key: String,
    state: JobState,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    abort_time: Option<DateTime<Utc>>,
    last_record_ingested: i64,
    last_record_check: i64,
    last_time_check: Instant,
}

impl Ingester {
    /// Open a feed file, decode its header, and derive table names.
    pub fn open(
        db: Arc<dyn SqlExecutor>,
        config: &IngestConfig,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let parser = FeedParser::open(
            path,
            config.dialect,
            &config.record_delim,
            &config.field_delim,
        )?;
        let names = TableNames::derive(path, config.table_prefix.as_deref());
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let index_key = file_name.split('.').next().unwrap_or_default().to_string();
        Ok(Self {
            db,
            config: config.clone(),
            parser,
            names,
            source: path.display().to_string(),
            file_name,
            index_key,
            state: JobState::NotStarted,
            started_at: None,
            finished_at: None,
            abort_time: None,
            last_record_ingested: -1,
            last_record_check: 0,
            last_time_check: Instant::now(),
        })
    }

    /// Live table this ingest targets.
    pub fn table_name(&self) -> &str {
        &self.names.live
    }

    /// Export mode declared by the feed.
    pub fn export_mode(&self) -> ExportMode {
        self.parser.metadata().export_mode
    }

    /// Index of the most recently ingested record.
    pub fn last_record_ingested(&self) -> i64 {
        self.last_record_ingested
    }

    /// Snapshot of the job for reporting.
    pub fn status(&self) -> IngestStatus {
        let expected = self.parser.metadata().records_expected;
        let ingested = self.last_record_ingested.max(0);
        IngestStatus {
            source: self.source.clone(),
            file_name: self.file_name.clone(),
            table: self.names.live.clone(),
            export_mode: self.parser.metadata().export_mode,
            state: self.state,
            started_at: self.started_at,
            finished_at: self.finished_at,
            abort_time: self.abort_time,
            records_ingested: ingested,
            records_expected: expected,
            progress: if expected == 0 {
                0.0
            } else {
                ingested as f64 / expected as f64
            },
        }
    }

    /// Ingest the whole feed, dispatching on its export mode.
    pub async fn ingest(&mut self, skip_key_violators: bool) -> Result<()> {
        match self.parser.metadata().export_mode {
            ExportMode::Full => self.ingest_full(skip_key_violators).await,
            ExportMode::Incremental => self.ingest_incremental(0, skip_key_violators).await,
        }
    }

    /// Resume an interrupted ingest from `from_record`, dispatching on
    /// the feed's export mode.
    pub async fn ingest_resume(&mut self, from_record: i64, skip_key_violators: bool) -> Result<()> {
        match self.parser.metadata().export_mode {
            ExportMode::Full => self.ingest_full_resume(from_record, skip_key_violators).await,
            ExportMode::Incremental => {
                self.ingest_incremental(from_record, skip_key_violators).await
            }
        }
    }

    /// Full ingest: build a staging table, populate it, swap it in.
    pub async fn ingest_full(&mut self, skip_key_violators: bool) -> Result<()> {
        info!(
            table = %self.names.live,
            bytes = self.parser.file_size(),
            "Beginning full ingest"
        );
        self.begin();
        let outcome = self.run_full(0, false, skip_key_violators).await;
        self.finish("full ingest", outcome)
    }

    /// Resume an interrupted full ingest. The staging table from the
    /// aborted run is reused; records up to and including `from_record`
    /// are skipped.
    pub async fn ingest_full_resume(
        &mut self,
        from_record: i64,
        skip_key_violators: bool,
    ) -> Result<()> {
        info!(
            table = %self.names.live,
            bytes = self.parser.file_size(),
            from_record,
            "Resuming full ingest"
        );
        self.last_record_ingested = from_record - 1;
        self.begin();
        let outcome = self.run_full(from_record, true, skip_key_violators).await;
        self.finish("resumed full ingest", outcome)
    }

    /// Incremental ingest: merge the feed's rows into the live table.
    pub async fn ingest_incremental(
        &mut self,
        from_record: i64,
        skip_key_violators: bool,
    ) -> Result<()> {
        if !db::table_exists(&*self.db, self.config.dialect, &self.config.db_name, &self.names.live)
            .await?
        {
            // Happens when the full export that would have created the
            // table was never ingested.
            warn!(
                table = %self.names.live,
                "Table does not exist in the database; skipping incremental ingest"
            );
            return Ok(());
        }

        let table_cols = db::column_count(
            &*self.db,
            self.config.dialect,
            &self.config.db_name,
            &self.names.live,
        )
        .await?;
        let file_cols = self.parser.metadata().column_names.len() as u64;
        if table_cols > file_cols {
            // The live table can trail the feed, never lead it.
            return Err(FeedloadError::schema(format!(
                "table {} has {} columns but the feed only has {}",
                self.names.live, table_cols, file_cols
            )));
        }
        if file_cols > table_cols {
            warn!(
                table = %self.names.live,
                "Feed contains additional columns not in the existing table; they will not be imported"
            );
            self.parser.trim_columns(table_cols as usize);
        }

        info!(
            table = %self.names.live,
            bytes = self.parser.file_size(),
            resuming = from_record > 0,
            "Beginning incremental ingest"
        );
        if from_record > 0 {
            self.last_record_ingested = from_record - 1;
        }
        self.begin();
        let outcome = self.run_incremental(from_record, skip_key_violators).await;
        self.finish("incremental ingest", outcome)
    }

    async fn run_full(
        &mut self,
        from_record: i64,
        resume: bool,
        skip_key_violators: bool,
    ) -> Result<()> {
        if !resume {
            self.create_table(&self.names.tmp).await?;
        }
        self.populate_table(&self.names.tmp.clone(), from_record, false, skip_key_violators)
            .await?;
        let has_pk = !self.parser.metadata().primary_key.is_empty();
        let swapper = TableSwapper::new(
            Arc::clone(&self.db),
            self.config.dialect,
            self.config.db_name.clone(),
        );
        swapper
            .swap(&self.names.tmp, &self.names.live, &self.names.old, has_pk)
            .await
    }

    async fn run_incremental(&mut self, from_record: i64, skip_key_violators: bool) -> Result<()> {
        // In-place updates win for small feeds; above the threshold a
        // staged union merge is much faster. Some dialects never take
        // the merge path because pruning against the primary key there
        // is slower than just updating in place.
        let in_place = self.config.dialect.forces_in_place_incremental()
            || self.parser.metadata().records_expected < self.config.union_threshold;

        if in_place {
            self.populate_table(&self.names.live.clone(), from_record, true, skip_key_violators)
                .await
        } else {
            self.create_table(&self.names.inc).await?;
            info!("Populating staging table");
            self.populate_table(&self.names.inc.clone(), 0, false, skip_key_violators)
                .await?;
            info!("Creating merged table");
            self.create_union_table().await?;
            self.drop_table(&self.names.inc).await?;
            info!("Applying primary key constraints");
            self.apply_primary_key(&self.names.union).await?;
            let has_pk = !self.parser.metadata().primary_key.is_empty();
            let swapper = TableSwapper::new(
                Arc::clone(&self.db),
                self.config.dialect,
                self.config.db_name.clone(),
            );
            swapper
                .swap(&self.names.union, &self.names.live, &self.names.old, has_pk)
                .await
        }
    }

    /// Create `table` from the feed schema, dropping any leftover table
    /// of the same name, and apply the primary key.
    async fn create_table(&self, table: &str) -> Result<()> {
        self.drop_table(table).await?;
        let meta = self.parser.metadata();
        let columns: Vec<String> = meta
            .column_names
            .iter()
            .zip(meta.data_types.iter())
            .map(|(name, ty)| format!("{} {}", name, ty))
            .collect();
        self.db
            .execute(&format!("CREATE TABLE {} ({})", table, columns.join(", ")))
            .await?;
        self.apply_primary_key(table).await
    }

    async fn apply_primary_key(&self, table: &str) -> Result<()> {
        let meta = self.parser.metadata();
        if meta.primary_key.is_empty() {
            return Ok(());
        }
        self.db
            .execute(
                &self
                    .config
                    .dialect
                    .add_primary_key_sql(table, &meta.primary_key),
            )
            .await?;
        Ok(())
    }

    // Backends emit a warning when the table is absent; that is expected
    // and stays out of the error path.
    async fn drop_table(&self, table: &str) -> Result<()> {
        db::execute_ignore_warnings(&*self.db, &format!("DROP TABLE IF EXISTS {}", table)).await?;
        Ok(())
    }

    /// Stream the feed's records into `table` in multi-row batches.
    ///
    /// Batches go through a fixed-width dispatch pool where the dialect
    /// tolerates concurrent sessions, otherwise they run one at a time.
    /// Finishes with any table-specific extra indexes and a planner
    /// statistics refresh.
    async fn populate_table(
        &mut self,
        table: &str,
        from_record: i64,
        incremental: bool,
        skip_key_violators: bool,
    ) -> Result<()> {
        let disposition =
            WriteDisposition::resolve(self.config.dialect, incremental, skip_key_violators);
        let writer = BatchWriter::new(self.config.dialect, disposition, self.parser.metadata());
        let concurrent = self.config.dialect.supports_concurrent_batches();
        let width = if concurrent {
            self.config.connections as usize
        } else {
            1
        };
        let mut pool = BatchPool::new(Arc::clone(&self.db), width);

        self.parser.seek_to_record(from_record)?;

        loop {
            let records = self.parser.next_records(self.config.batch_size)?;
            if records.is_empty() {
                break;
            }
            if let Some(sql) = writer.insert_statement(table, &records) {
                pool.dispatch(sql).await?;
            }
            self.last_record_ingested = self.parser.latest_record_num();
            if let Some(record) = self.check_progress() {
                info!("...at record {}...", record);
            }
        }
        // A sequential pool's drained statement is the last of the run;
        // its failure must abort rather than be logged away.
        pool.drain(!concurrent).await?;

        info!(records = self.last_record_ingested, "Ingested records");
        self.create_custom_indexes(table).await?;
        info!(%table, "Analyzing table");
        self.db
            .execute(&self.config.dialect.analyze_sql(table))
            .await?;
        Ok(())
    }

    /// Checkpoint when at least [`RECORD_GAP`] records and [`TIME_GAP`]
    /// have passed since the last checkpoint.
    fn check_progress(&mut self) -> Option<i64> {
        if self.last_record_ingested - self.last_record_check >= RECORD_GAP {
            let now = Instant::now();
            if now.duration_since(self.last_time_check) >= TIME_GAP {
                self.last_time_check = now;
                self.last_record_check = self.last_record_ingested;
                return Some(self.last_record_check);
            }
        }
        None
    }

    /// Extra lookup indexes for a handful of hot tables, keyed by the
    /// feed file's base name.
    async fn create_custom_indexes(&self, table: &str) -> Result<()> {
        if self.config.dialect != Dialect::Postgresql {
            return Ok(());
        }
        let sql = match self.index_key.as_str() {
            "artist_collection" => format!("CREATE INDEX ON {} (collection_id)", table),
            "collection" | "artist" => {
                format!("CREATE INDEX ON {} (lower(name) text_pattern_ops)", table)
            }
            _ => return Ok(()),
        };
        info!(key = %self.index_key, "Creating custom index");
        self.db.execute(&sql).await?;
        Ok(())
    }

    /// Build the union table: every staged row, plus every live row not
    /// superseded by a staged row with the same key and an equal or
    /// newer export stamp.
    async fn create_union_table(&self) -> Result<()> {
        self.drop_table(&self.names.union).await?;
        let sql = self
            .config
            .dialect
            .create_table_as_sql(&self.names.union, &self.union_select());
        self.db.execute(&sql).await?;
        Ok(())
    }

    fn union_select(&self) -> String {
        let live = &self.names.live;
        let inc = &self.names.inc;
        let key_matches: Vec<String> = self
            .parser
            .metadata()
            .primary_key
            .iter()
            .map(|col| format!("{}.{}={}.{}", live, col, inc, col))
            .collect();
        let where_clause = format!(
            "WHERE {}.export_date <= {}.export_date AND {}",
            live,
            inc,
            key_matches.join(" AND ")
        );
        let select = format!(
            "SELECT * FROM {} WHERE 0 = (SELECT COUNT(*) FROM {} {})",
            live, inc, where_clause
        );
        if self.config.dialect.supports_native_replace() {
            format!("IGNORE SELECT * FROM {} UNION ALL {}", inc, select)
        } else {
            format!("SELECT * FROM {} UNION ALL {}", inc, select)
        }
    }

    fn begin(&mut self) {
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
        self.last_time_check = Instant::now();
    }

    fn finish(&mut self, operation: &str, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                self.state = JobState::Completed;
                self.finished_at = Some(Utc::now());
                if let (Some(start), Some(end)) = (self.started_at, self.finished_at) {
                    info!(
                        table = %self.names.live,
                        elapsed_secs = (end - start).num_seconds(),
                        "Completed {}",
                        operation
                    );
                }
                Ok(())
            }
            Err(err) => {
                self.state = JobState::Aborted;
                self.abort_time = Some(Utc::now());
                error!(
                    source = %self.source,
                    operation,
                    last_record = self.last_record_ingested,
                    "Fatal error during {}",
                    operation
                );
                Err(err)
            }
        }
    }
}
