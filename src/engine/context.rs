//! # Processing Context Module
//!
//! One `ProcessingContext` exists per batch. It owns the batch's [`ProgressStats`],
//! tracks the state of every item it has seen, and forwards notifications to the
//! batch [`Observer`].
//!
//! Per-item state machine:
//!
//! ```text
//! Pending -> Processing -> (Retrying -> Processing)* -> Completed | Failed | Skipped
//! ```
//!
//! `Pending` is implicit: an item the context has never heard of. `complete_item` and
//! `fail_item` only accept started items. `skip_item` also accepts a pending item, which
//! is how a batch accounts for items it never got to after cancellation. Terminal states
//! are entered exactly once; a rejected terminal call leaves the counters untouched.

use crate::engine::cancel::CancellationToken;
use crate::engine::error::{Result, RetryLedgerError};
use crate::engine::observer::{ItemStatus, Observer};
use crate::engine::progress::{ItemRecord, ProgressSnapshot, ProgressStats};
use crate::engine::report::BatchReport;
use chrono::{DateTime, Utc};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Lifecycle state of one item inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Processing,
    Retrying,
    Completed,
    Failed,
    Skipped,
}

impl ItemState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemState::Completed | ItemState::Failed | ItemState::Skipped
        )
    }

    pub fn is_in_flight(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemState::Processing => "processing",
            ItemState::Retrying => "retrying",
            ItemState::Completed => "completed",
            ItemState::Failed => "failed",
            ItemState::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct ItemTable {
    states: HashMap<String, ItemState>,
    current: Option<String>,
    /// In-flight items whose `Failed` status already reached the observer
    failure_announced: HashSet<String>,
}

impl ItemTable {
    fn terminated(&self) -> u64 {
        self.states.values().filter(|state| state.is_terminal()).count() as u64
    }
}

/// Per-batch session object
pub struct ProcessingContext {
    batch_id: Uuid,
    started_at: DateTime<Utc>,
    stats: ProgressStats,
    observer: Arc<dyn Observer>,
    items: Mutex<ItemTable>,
    cancellation: CancellationToken,
    finished: bool,
}

impl fmt::Debug for ProcessingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingContext")
            .field("batch_id", &self.batch_id)
            .field("stats", &self.stats.snapshot())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

impl ProcessingContext {
    /// Start a new batch of `total` items
    pub fn new(total: u64, observer: Arc<dyn Observer>) -> Self {
        Self::with_cancellation(total, observer, CancellationToken::new())
    }

    /// Start a new batch that stops issuing attempts once `cancellation` fires
    pub fn with_cancellation(
        total: u64,
        observer: Arc<dyn Observer>,
        cancellation: CancellationToken,
    ) -> Self {
        let batch_id = Uuid::now_v7();
        debug!("Starting batch {} with {} item(s)", batch_id, total);
        Self {
            batch_id,
            started_at: Utc::now(),
            stats: ProgressStats::new(total),
            observer,
            items: Mutex::new(ItemTable::default()),
            cancellation,
            finished: false,
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn total(&self) -> u64 {
        self.stats.total()
    }

    fn items(&self) -> MutexGuard<'_, ItemTable> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark an item as in flight and make it the current item
    pub fn start_item(&self, item_id: &str) -> Result<()> {
        {
            let mut items = self.items();
            if let Some(state) = items.states.get(item_id) {
                return Err(RetryLedgerError::AlreadyStarted {
                    item_id: item_id.to_string(),
                    state: state.to_string(),
                });
            }
            items
                .states
                .insert(item_id.to_string(), ItemState::Processing);
            items.current = Some(item_id.to_string());
        }
        debug!("Batch {}: started {}", self.batch_id, item_id);
        self.observer.set_status(item_id, ItemStatus::Processing);
        Ok(())
    }

    /// Report a transient status change. Never moves an item into a terminal state.
    pub fn set_status(&self, item_id: &str, status: ItemStatus) {
        {
            let mut guard = self.items();
            let items = &mut *guard;
            if let Some(state) = items.states.get_mut(item_id) {
                if state.is_in_flight() {
                    match status {
                        ItemStatus::Retrying => *state = ItemState::Retrying,
                        ItemStatus::Processing | ItemStatus::Recovered => {
                            *state = ItemState::Processing
                        }
                        ItemStatus::Failed => {
                            items.failure_announced.insert(item_id.to_string());
                        }
                        _ => {}
                    }
                }
            }
        }
        self.observer.set_status(item_id, status);
    }

    pub fn info(&self, message: &str) {
        self.observer.info(message);
    }

    pub fn error(&self, message: &str) {
        self.observer.error(message);
    }

    /// Record a warning without touching item state
    pub fn warn(&self, message: &str, item_id: Option<&str>) {
        self.stats.record_warning();
        match item_id {
            Some(id) => self.observer.warn(&format!("{id}: {message}")),
            None => self.observer.warn(message),
        }
    }

    /// Transition an item to `terminal`, applying `record` to the stats under the item lock
    ///
    /// Returns whether a `Failed` status was already sent to the observer for this item.
    fn terminate(
        &self,
        item_id: &str,
        terminal: ItemState,
        record: impl FnOnce(&ProgressStats) -> Result<()>,
    ) -> Result<bool> {
        let mut items = self.items();
        match items.states.get(item_id) {
            Some(state) if state.is_terminal() => {
                error!(
                    "Batch {}: {} already {}, rejecting {}",
                    self.batch_id, item_id, state, terminal
                );
                return Err(RetryLedgerError::AlreadyTerminated {
                    item_id: item_id.to_string(),
                    state: state.to_string(),
                });
            }
            None if terminal != ItemState::Skipped => {
                error!(
                    "Batch {}: {} was never started, rejecting {}",
                    self.batch_id, item_id, terminal
                );
                return Err(RetryLedgerError::NotStarted {
                    item_id: item_id.to_string(),
                });
            }
            _ => {}
        }
        record(&self.stats)?;
        items.states.insert(item_id.to_string(), terminal);
        if items.current.as_deref() == Some(item_id) {
            items.current = None;
        }
        Ok(items.failure_announced.remove(item_id))
    }

    pub fn complete_item(&self, item_id: &str, target_id: Option<&str>) -> Result<()> {
        self.terminate(item_id, ItemState::Completed, |stats| {
            stats.record_success(item_id, target_id)
        })?;
        debug!("Batch {}: completed {}", self.batch_id, item_id);
        self.observer.set_status(item_id, ItemStatus::Completed);
        if let Some(target) = target_id.filter(|t| !t.is_empty()) {
            self.observer.info(&format!("{item_id} -> {target}"));
        }
        Ok(())
    }

    /// Record a started item as failed and send `reason` to the observer at error level
    pub fn fail_item(&self, item_id: &str, reason: &str) -> Result<()> {
        let announced = self.terminate(item_id, ItemState::Failed, |stats| {
            stats.record_failure(item_id, reason)
        })?;
        debug!("Batch {}: failed {}: {}", self.batch_id, item_id, reason);
        if !announced {
            self.observer.set_status(item_id, ItemStatus::Failed);
        }
        self.observer.error(&format!("{item_id}: {reason}"));
        Ok(())
    }

    /// Record an item as skipped, whether or not it was started
    pub fn skip_item(&self, item_id: &str) -> Result<()> {
        self.terminate(item_id, ItemState::Skipped, |stats| {
            stats.record_skip(item_id)
        })?;
        debug!("Batch {}: skipped {}", self.batch_id, item_id);
        self.observer.set_status(item_id, ItemStatus::Skipped);
        Ok(())
    }

    pub fn item_state(&self, item_id: &str) -> Option<ItemState> {
        self.items().states.get(item_id).copied()
    }

    pub fn current_item(&self) -> Option<String> {
        self.items().current.clone()
    }

    /// Number of items that reached a terminal state
    pub fn terminated(&self) -> u64 {
        self.items().terminated()
    }

    /// Items started but not yet terminated, sorted by id
    pub fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .items()
            .states
            .iter()
            .filter(|(_, state)| state.is_in_flight())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.stats.snapshot()
    }

    pub fn ledger(&self) -> Vec<ItemRecord> {
        self.stats.ledger()
    }

    pub fn skipped_records(&self) -> Vec<ItemRecord> {
        self.stats.skipped_records()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        debug!("Batch {}: cancellation requested", self.batch_id);
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Report of the batch so far, without ending it
    pub fn report(&self) -> BatchReport {
        BatchReport::new(
            self.batch_id,
            self.started_at,
            self.stats.snapshot(),
            self.stats.ledger(),
        )
    }

    /// End the batch
    ///
    /// Fails with [`RetryLedgerError::UnterminatedItems`] if any started item never
    /// reached a terminal state, with [`RetryLedgerError::AccountingMismatch`] if the
    /// counters disagree with the terminated items, and with
    /// [`RetryLedgerError::IncompleteBatch`] if a known total was not reached.
    pub fn finish(mut self) -> Result<BatchReport> {
        self.finished = true;
        let unterminated = self.in_flight();
        if !unterminated.is_empty() {
            error!(
                "Batch {} ended with {} unterminated item(s)",
                self.batch_id,
                unterminated.len()
            );
            return Err(RetryLedgerError::UnterminatedItems(unterminated));
        }

        let snapshot = self.stats.snapshot();
        let counted = snapshot.succeeded + snapshot.failed + snapshot.skipped;
        let tracked = self.terminated();
        if counted != tracked {
            error!(
                "Batch {}: {} item(s) counted but {} terminated",
                self.batch_id, counted, tracked
            );
            return Err(RetryLedgerError::AccountingMismatch { counted, tracked });
        }
        if snapshot.total > 0 && tracked != snapshot.total {
            error!(
                "Batch {} ended with {} of {} item(s) terminated",
                self.batch_id, tracked, snapshot.total
            );
            return Err(RetryLedgerError::IncompleteBatch {
                total: snapshot.total,
                terminated: tracked,
            });
        }

        let report = self.report();
        debug!("Batch {} finished: {}", self.batch_id, report.summary_line());
        Ok(report)
    }
}

impl Drop for ProcessingContext {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let unterminated = self.in_flight();
        if !unterminated.is_empty() {
            error!(
                "Batch {} dropped with {} unterminated item(s): {}",
                self.batch_id,
                unterminated.len(),
                unterminated.join(", ")
            );
        }
    }
}
