//! Ingest job state and reportable status snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::feed::ExportMode;

/// Lifecycle of one ingest job.
///
/// `NotStarted` moves to `Running` when ingestion begins, then to
/// exactly one of `Completed` or `Aborted`. No other transitions exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    NotStarted,
    Running,
    Completed,
    Aborted,
}

/// Immutable snapshot of an ingest job, safe to serialize for
/// reporting. Mutating the snapshot never affects the job.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStatus {
    /// Feed file being ingested, as given on the command line.
    pub source: String,
    /// Base name of the feed file.
    pub file_name: String,
    /// Live table the ingest targets.
    pub table: String,
    /// Export mode declared by the feed.
    pub export_mode: ExportMode,
    /// Current lifecycle state.
    pub state: JobState,
    /// When ingestion began, if it has.
    pub started_at: Option<DateTime<Utc>>,
    /// When ingestion completed. Stays unset on an aborted run.
    pub finished_at: Option<DateTime<Utc>>,
    /// When ingestion aborted, if it did.
    pub abort_time: Option<DateTime<Utc>>,
    /// Records decoded so far.
    pub records_ingested: i64,
    /// Estimated total records, from the compressed file size.
    pub records_expected: u64,
    /// Fraction of the estimate ingested so far.
    pub progress: f64,
}

impl IngestStatus {
    /// Wall-clock duration of the job so far, in seconds.
    pub fn elapsed_secs(&self) -> Option<i64> {
        let started = self.started_at?;
        let end = self
            .finished_at
            .or(self.abort_time)
            .unwrap_or_else(Utc::now);
        Some((end - started).num_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: JobState) -> IngestStatus {
        IngestStatus {
            source: "feeds/artist.tbz".to_string(),
            file_name: "artist.tbz".to_string(),
            table: "artist".to_string(),
            export_mode: ExportMode::Full,
            state,
            started_at: None,
            finished_at: None,
            abort_time: None,
            records_ingested: 0,
            records_expected: 0,
            progress: 0.0,
        }
    }

    #[test]
    fn test_status_serializes() {
        let mut snapshot = status(JobState::Running);
        snapshot.started_at = Some(Utc::now());
        snapshot.records_ingested = 1_000;
        snapshot.records_expected = 499_999;
        snapshot.progress = 1_000.0 / 499_999.0;
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"state\":\"running\""));
        assert!(json.contains("\"table\":\"artist\""));
        assert!(json.contains("\"file_name\":\"artist.tbz\""));
        assert!(json.contains("\"abort_time\":null"));
    }

    #[test]
    fn test_elapsed_none_before_start() {
        assert!(status(JobState::NotStarted).elapsed_secs().is_none());
    }

    #[test]
    fn test_elapsed_ends_at_abort_time() {
        let mut snapshot = status(JobState::Aborted);
        let start = Utc::now() - chrono::Duration::seconds(600);
        snapshot.started_at = Some(start);
        snapshot.abort_time = Some(start + chrono::Duration::seconds(42));
        assert_eq!(snapshot.elapsed_secs(), Some(42));
    }
}
