use crate::engine::classifier::OperationError;
use crate::engine::config::BatchConfig;
use crate::engine::context::ProcessingContext;
use crate::engine::error::{Result, RetryLedgerError};
use crate::engine::retry::{RetryHandler, RetryOutcome};
use log::{debug, error, info};
use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// How the context accounted for one item of a batch run
#[derive(Debug, Clone, PartialEq)]
pub enum ItemDisposition<T> {
    /// Started, driven through the retry loop and given its terminal call
    Settled(RetryOutcome<T>),
    /// Never started because the batch was cancelled first; counted as skipped
    Skipped,
    /// Refused by the context and left out of the counters, e.g. a duplicate id.
    /// `outcome` is set when the operation ran but its terminal call was refused.
    Rejected {
        error: RetryLedgerError,
        outcome: Option<RetryOutcome<T>>,
    },
}

/// What happened to one item of a batch run
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult<T> {
    pub item_id: String,
    pub disposition: ItemDisposition<T>,
}

impl<T> ItemResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(&self.disposition, ItemDisposition::Settled(outcome) if outcome.is_success())
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.disposition, ItemDisposition::Skipped)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.disposition, ItemDisposition::Rejected { .. })
    }

    /// Result of the retry loop, if the operation ran
    pub fn outcome(&self) -> Option<&RetryOutcome<T>> {
        match &self.disposition {
            ItemDisposition::Settled(outcome) => Some(outcome),
            ItemDisposition::Rejected { outcome, .. } => outcome.as_ref(),
            ItemDisposition::Skipped => None,
        }
    }

    pub fn error(&self) -> Option<&RetryLedgerError> {
        match &self.disposition {
            ItemDisposition::Rejected { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Fans a list of items out over worker threads sharing one context and one handler
///
/// Every item is started, driven through the retry loop and settled with exactly one
/// terminal call. Once the context is cancelled, items that have not been picked up yet
/// are skipped instead of started. Items the context refuses come back as
/// [`ItemDisposition::Rejected`]; the batch then falls short of its total and
/// [`ProcessingContext::finish`] reports it.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    handler: Arc<RetryHandler>,
    workers: usize,
}

impl BatchRunner {
    pub fn new(handler: Arc<RetryHandler>, workers: usize) -> Self {
        Self {
            handler,
            workers: workers.max(1),
        }
    }

    pub fn from_config(config: &BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            Arc::new(RetryHandler::new(config.retry.clone())),
            config.workers,
        ))
    }

    pub fn handler(&self) -> &RetryHandler {
        &self.handler
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every item, recording successes without a target id
    pub fn run<T, E, F>(
        &self,
        ctx: &ProcessingContext,
        items: &[String],
        operation: F,
    ) -> Vec<ItemResult<T>>
    where
        F: Fn(&str) -> std::result::Result<T, E> + Sync,
        E: Into<OperationError>,
        T: Send,
    {
        self.run_with_targets(ctx, items, operation, |_| None)
    }

    /// Run every item; `target_of` names where a successful item ended up.
    /// Results come back in input order.
    pub fn run_with_targets<T, E, F, G>(
        &self,
        ctx: &ProcessingContext,
        items: &[String],
        operation: F,
        target_of: G,
    ) -> Vec<ItemResult<T>>
    where
        F: Fn(&str) -> std::result::Result<T, E> + Sync,
        G: Fn(&T) -> Option<String> + Sync,
        E: Into<OperationError>,
        T: Send,
    {
        if items.is_empty() {
            return Vec::new();
        }

        let worker_count = self.workers.min(items.len());
        info!(
            "Batch {}: processing {} item(s) on {} worker(s)",
            ctx.batch_id(),
            items.len(),
            worker_count
        );

        let next = AtomicUsize::new(0);
        let (next, operation, target_of) = (&next, &operation, &target_of);

        let mut results: Vec<(usize, ItemResult<T>)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..worker_count)
                .map(|worker| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        loop {
                            let index = next.fetch_add(1, Ordering::Relaxed);
                            let Some(item_id) = items.get(index) else {
                                break;
                            };
                            debug!("Worker {} picked {}", worker, item_id);
                            let result = self.process_one(ctx, item_id, operation, target_of);
                            done.push((index, result));
                        }
                        done
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| panic::resume_unwind(payload))
                })
                .collect()
        });

        results.sort_by_key(|(index, _)| *index);
        let rejected = results.iter().filter(|(_, r)| r.is_rejected()).count();
        if rejected > 0 {
            error!(
                "Batch {}: {} of {} item(s) rejected and left unaccounted",
                ctx.batch_id(),
                rejected,
                items.len()
            );
        }
        results.into_iter().map(|(_, result)| result).collect()
    }

    fn process_one<T, E, F, G>(
        &self,
        ctx: &ProcessingContext,
        item_id: &str,
        operation: &F,
        target_of: &G,
    ) -> ItemResult<T>
    where
        F: Fn(&str) -> std::result::Result<T, E>,
        G: Fn(&T) -> Option<String>,
        E: Into<OperationError>,
    {
        let item_result = |disposition| ItemResult {
            item_id: item_id.to_string(),
            disposition,
        };

        if ctx.is_cancelled() {
            return item_result(match ctx.skip_item(item_id) {
                Ok(()) => ItemDisposition::Skipped,
                Err(error) => {
                    error!("Batch {}: cannot skip {}: {}", ctx.batch_id(), item_id, error);
                    ItemDisposition::Rejected {
                        error,
                        outcome: None,
                    }
                }
            });
        }

        if let Err(error) = ctx.start_item(item_id) {
            error!("Batch {}: cannot start {}: {}", ctx.batch_id(), item_id, error);
            return item_result(ItemDisposition::Rejected {
                error,
                outcome: None,
            });
        }

        let outcome = self
            .handler
            .execute_with_retry(|| operation(item_id), ctx, item_id);
        let target = outcome.value().and_then(target_of);
        item_result(match outcome.settle(ctx, item_id, target.as_deref()) {
            Ok(()) => ItemDisposition::Settled(outcome),
            Err(error) => {
                error!("Batch {}: cannot settle {}: {}", ctx.batch_id(), item_id, error);
                ItemDisposition::Rejected {
                    error,
                    outcome: Some(outcome),
                }
            }
        })
    }
}
