//! # Progress Accounting Module
//!
//! Batch counters plus the ordered ledger of per-item outcomes. Every mutation goes
//! through a named method that takes one lock, so the counter invariants hold after
//! each completed call even with several workers recording at once.

use crate::engine::error::{Result, RetryLedgerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Final status of an item in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Failed,
    Skipped,
}

/// One per-item outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub source_id: String,
    /// Where the item ended up; empty when there is no target
    pub target_id: String,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Completion time, taken when the record was appended
    pub timestamp: DateTime<Utc>,
}

/// Consistent read of all counters at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub warnings: u64,
    /// succeeded + failed
    pub completed: u64,
    /// Percentage in [0, 100]
    pub success_rate: f64,
}

impl ProgressSnapshot {
    /// Items that reached any terminal state
    pub fn terminated(&self) -> u64 {
        self.completed + self.skipped
    }

    /// Items not yet accounted for; zero when the total is unset
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.terminated())
    }
}

/// Success rate as a percentage of `total`, or of `succeeded + failed` when no total is set
pub fn success_rate(succeeded: u64, failed: u64, total: u64) -> f64 {
    let denominator = if total > 0 { total } else { succeeded + failed };
    if denominator == 0 {
        return 0.0;
    }
    (succeeded as f64 / denominator as f64 * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    succeeded: u64,
    failed: u64,
    skipped: u64,
    warnings: u64,
    ledger: Vec<ItemRecord>,
    skipped_records: Vec<ItemRecord>,
}

impl Counters {
    fn terminated(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }

    fn ensure_capacity(&self) -> Result<()> {
        if self.total > 0 && self.terminated() >= self.total {
            return Err(RetryLedgerError::CapacityExceeded {
                total: self.total,
                recorded: self.terminated(),
            });
        }
        Ok(())
    }

    fn record(
        status: RecordStatus,
        item_id: &str,
        target_id: Option<&str>,
        reason: Option<&str>,
    ) -> ItemRecord {
        ItemRecord {
            source_id: item_id.to_string(),
            target_id: target_id.unwrap_or_default().to_string(),
            status,
            reason: reason.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

/// Thread-safe counters and ledger for one batch
///
/// A `total` of zero means "unknown": no capacity check is made and the success rate is
/// computed over completed items instead.
#[derive(Debug, Default)]
pub struct ProgressStats {
    inner: Mutex<Counters>,
}

impl ProgressStats {
    pub fn new(total: u64) -> Self {
        Self {
            inner: Mutex::new(Counters {
                total,
                ..Counters::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // counters are only touched inside complete updates, so a poisoned lock is still consistent
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_success(&self, item_id: &str, target_id: Option<&str>) -> Result<()> {
        let mut counters = self.lock();
        counters.ensure_capacity()?;
        counters.succeeded += 1;
        let record = Counters::record(RecordStatus::Success, item_id, target_id, None);
        counters.ledger.push(record);
        Ok(())
    }

    pub fn record_failure(&self, item_id: &str, reason: &str) -> Result<()> {
        let mut counters = self.lock();
        counters.ensure_capacity()?;
        counters.failed += 1;
        let record = Counters::record(RecordStatus::Failed, item_id, None, Some(reason));
        counters.ledger.push(record);
        Ok(())
    }

    /// Skips are kept out of the ledger and out of succeeded/failed
    pub fn record_skip(&self, item_id: &str) -> Result<()> {
        let mut counters = self.lock();
        counters.ensure_capacity()?;
        counters.skipped += 1;
        let record = Counters::record(RecordStatus::Skipped, item_id, None, None);
        counters.skipped_records.push(record);
        Ok(())
    }

    pub fn record_warning(&self) {
        self.lock().warnings += 1;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let counters = self.lock();
        ProgressSnapshot {
            total: counters.total,
            succeeded: counters.succeeded,
            failed: counters.failed,
            skipped: counters.skipped,
            warnings: counters.warnings,
            completed: counters.succeeded + counters.failed,
            success_rate: success_rate(counters.succeeded, counters.failed, counters.total),
        }
    }

    /// Always computed from the live counters
    pub fn success_rate(&self) -> f64 {
        self.snapshot().success_rate
    }

    pub fn total(&self) -> u64 {
        self.lock().total
    }

    /// Success and failure records in completion order
    pub fn ledger(&self) -> Vec<ItemRecord> {
        self.lock().ledger.clone()
    }

    pub fn skipped_records(&self) -> Vec<ItemRecord> {
        self.lock().skipped_records.clone()
    }
}
