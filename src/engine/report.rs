//! # Batch Report Module
//!
//! Read-only summary of a finished batch, suitable for a CLI footer or for
//! deciding the process exit code.

use crate::engine::progress::{ItemRecord, ProgressSnapshot, RecordStatus};
use crate::engine::stats::RetryStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub warnings: u64,
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_stats: Option<RetryStats>,
    pub ledger: Vec<ItemRecord>,
}

impl BatchReport {
    pub fn new(
        batch_id: Uuid,
        started_at: DateTime<Utc>,
        snapshot: ProgressSnapshot,
        ledger: Vec<ItemRecord>,
    ) -> Self {
        Self {
            batch_id,
            started_at,
            finished_at: Utc::now(),
            total: snapshot.total,
            succeeded: snapshot.succeeded,
            failed: snapshot.failed,
            skipped: snapshot.skipped,
            warnings: snapshot.warnings,
            success_rate: snapshot.success_rate,
            retry_stats: None,
            ledger,
        }
    }

    /// Attach the retry counters of the handler that drove this batch
    pub fn with_retry_stats(mut self, stats: RetryStats) -> Self {
        self.retry_stats = Some(stats);
        self
    }

    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Non-zero when any item failed
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &ItemRecord> {
        self.ledger
            .iter()
            .filter(|record| record.status == RecordStatus::Failed)
    }

    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "Processed {}/{} items: {} succeeded, {} failed, {} skipped ({:.1}% success)",
            self.completed(),
            self.total,
            self.succeeded,
            self.failed,
            self.skipped,
            self.success_rate
        );
        if self.warnings > 0 {
            line.push_str(&format!(", {} warning(s)", self.warnings));
        }
        if let Some(stats) = &self.retry_stats {
            line.push_str(&format!(
                "; {} items recovered after retry, {} items failed permanently",
                stats.successful_retries,
                stats.permanent_errors + stats.failed_retries
            ));
        }
        line
    }
}
