//! # Retry Execution Module
//!
//! Runs a caller-supplied operation, classifies each failure and decides whether to try
//! again. Recoverable failures are retried with linear backoff up to `max_attempts`;
//! permanent failures stop immediately. Operation failures never escape as errors: the
//! caller always gets a [`RetryOutcome`].
//!
//! The outcome is a success exactly when the attempt that ended the loop returned `Ok`.
//! Use [`RetryOutcome::settle`] to turn it into the one terminal call on the context.
//! Giving up only marks the item `failed` for the observer; the error-level message
//! carrying the user message comes from `fail_item` when the outcome is settled.

use crate::engine::classifier::{ErrorClassification, ErrorClassifier, OperationError};
use crate::engine::config::RetryConfig;
use crate::engine::context::ProcessingContext;
use crate::engine::error::Result;
use crate::engine::observer::ItemStatus;
use crate::engine::stats::RetryStats;
use log::{debug, warn};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

/// Reason recorded for items that were cancelled before they could finish
pub const CANCELLED_REASON: &str = "cancelled";

/// Final result of driving one item through the retry loop
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    /// The last attempt returned a value
    Succeeded { value: T, attempts: u32 },
    /// A permanent failure, or a recoverable one that outlived the attempt budget
    Failed {
        classification: ErrorClassification,
        attempts: u32,
    },
    /// Cancellation was observed before the next attempt or backoff sleep
    Cancelled {
        attempts: u32,
        last_failure: Option<ErrorClassification>,
    },
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryOutcome::Cancelled { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Failed { attempts, .. }
            | RetryOutcome::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            RetryOutcome::Succeeded { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            RetryOutcome::Succeeded { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Classification of the failure that ended the loop, if any
    pub fn classification(&self) -> Option<&ErrorClassification> {
        match self {
            RetryOutcome::Succeeded { .. } => None,
            RetryOutcome::Failed { classification, .. } => Some(classification),
            RetryOutcome::Cancelled { last_failure, .. } => last_failure.as_ref(),
        }
    }

    /// `(success, result, classification)`
    pub fn into_parts(self) -> (bool, Option<T>, Option<ErrorClassification>) {
        match self {
            RetryOutcome::Succeeded { value, .. } => (true, Some(value), None),
            RetryOutcome::Failed { classification, .. } => (false, None, Some(classification)),
            RetryOutcome::Cancelled { last_failure, .. } => (false, None, last_failure),
        }
    }

    /// Make exactly one terminal call on `ctx` for this outcome
    ///
    /// Success completes the item with `target_id`; failure fails it with the
    /// classification; cancellation fails it with [`CANCELLED_REASON`].
    pub fn settle(
        &self,
        ctx: &ProcessingContext,
        item_id: &str,
        target_id: Option<&str>,
    ) -> Result<()> {
        match self {
            RetryOutcome::Succeeded { .. } => ctx.complete_item(item_id, target_id),
            RetryOutcome::Failed { classification, .. } => {
                ctx.fail_item(item_id, &classification.to_string())
            }
            RetryOutcome::Cancelled { .. } => ctx.fail_item(item_id, CANCELLED_REASON),
        }
    }
}

/// What to do after a failed attempt
enum FailureStep {
    Retry(ErrorClassification),
    GiveUp(ErrorClassification),
}

/// Executes operations with classification-driven retries
///
/// One handler per batch session; its [`RetryStats`] accumulate across every item it
/// runs. A handler may be shared between worker threads.
#[derive(Debug)]
pub struct RetryHandler {
    config: RetryConfig,
    classifier: ErrorClassifier,
    stats: Mutex<RetryStats>,
}

impl Default for RetryHandler {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self::with_classifier(config, ErrorClassifier::standard())
    }

    pub fn with_classifier(config: RetryConfig, classifier: ErrorClassifier) -> Self {
        Self {
            config,
            classifier,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Consistent copy of the counters
    pub fn stats(&self) -> RetryStats {
        self.lock_stats().clone()
    }

    fn lock_stats(&self) -> MutexGuard<'_, RetryStats> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update_stats(&self, update: impl FnOnce(&mut RetryStats)) {
        update(&mut self.lock_stats());
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of attempts or the
    /// batch is cancelled. Backoff sleeps block the calling thread.
    pub fn execute_with_retry<T, E, F>(
        &self,
        mut operation: F,
        ctx: &ProcessingContext,
        item_id: &str,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> std::result::Result<T, E>,
        E: Into<OperationError>,
    {
        let mut attempt: u32 = 1;
        let mut last_failure = None;

        loop {
            if ctx.is_cancelled() {
                return self.cancelled(item_id, attempt - 1, last_failure);
            }

            self.update_stats(|stats| stats.total_attempts += 1);
            let classification = match operation() {
                Ok(value) => return self.succeeded(ctx, item_id, attempt, value),
                Err(err) => match self.on_failure(ctx, item_id, attempt, err.into()) {
                    FailureStep::GiveUp(classification) => {
                        return RetryOutcome::Failed {
                            classification,
                            attempts: attempt,
                        };
                    }
                    FailureStep::Retry(classification) => classification,
                },
            };

            if ctx.is_cancelled() {
                return self.cancelled(item_id, attempt, Some(classification));
            }
            self.announce_retry(ctx, item_id, attempt, &classification);
            self.config.sleep(attempt);

            last_failure = Some(classification);
            attempt += 1;
        }
    }

    /// Async twin of [`execute_with_retry`](Self::execute_with_retry); backoff uses
    /// `tokio::time::sleep` so only the calling task waits.
    pub async fn execute_with_retry_async<T, E, F, Fut>(
        &self,
        mut operation: F,
        ctx: &ProcessingContext,
        item_id: &str,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<OperationError>,
    {
        let mut attempt: u32 = 1;
        let mut last_failure = None;

        loop {
            if ctx.is_cancelled() {
                return self.cancelled(item_id, attempt - 1, last_failure);
            }

            self.update_stats(|stats| stats.total_attempts += 1);
            let classification = match operation().await {
                Ok(value) => return self.succeeded(ctx, item_id, attempt, value),
                Err(err) => match self.on_failure(ctx, item_id, attempt, err.into()) {
                    FailureStep::GiveUp(classification) => {
                        return RetryOutcome::Failed {
                            classification,
                            attempts: attempt,
                        };
                    }
                    FailureStep::Retry(classification) => classification,
                },
            };

            if ctx.is_cancelled() {
                return self.cancelled(item_id, attempt, Some(classification));
            }
            self.announce_retry(ctx, item_id, attempt, &classification);
            let delay = self.config.backoff_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            last_failure = Some(classification);
            attempt += 1;
        }
    }

    fn succeeded<T>(
        &self,
        ctx: &ProcessingContext,
        item_id: &str,
        attempt: u32,
        value: T,
    ) -> RetryOutcome<T> {
        if attempt > 1 {
            self.update_stats(|stats| stats.successful_retries += 1);
            debug!("{} succeeded on attempt {}", item_id, attempt);
            ctx.set_status(item_id, ItemStatus::Recovered);
            ctx.info("Successfully processed after retry");
        }
        RetryOutcome::Succeeded {
            value,
            attempts: attempt,
        }
    }

    fn on_failure(
        &self,
        ctx: &ProcessingContext,
        item_id: &str,
        attempt: u32,
        err: OperationError,
    ) -> FailureStep {
        let classification = self.classifier.classify(&err);

        if !classification.is_recoverable {
            self.update_stats(|stats| stats.permanent_errors += 1);
            warn!(
                "{} failed permanently ({}): {}",
                item_id, classification.kind, classification.detail
            );
            self.give_up(ctx, item_id);
            return FailureStep::GiveUp(classification);
        }

        let exhausted = attempt >= self.config.max_attempts;
        self.update_stats(|stats| {
            stats.recoverable_errors_encountered += 1;
            if attempt == 1 {
                stats.files_with_recoverable_issues += 1;
            }
            if exhausted {
                stats.failed_retries += 1;
            }
        });

        if exhausted {
            warn!(
                "{} still failing after {} attempt(s) ({}): {}",
                item_id, attempt, classification.kind, classification.detail
            );
            self.give_up(ctx, item_id);
            return FailureStep::GiveUp(classification);
        }

        FailureStep::Retry(classification)
    }

    fn give_up(&self, ctx: &ProcessingContext, item_id: &str) {
        ctx.set_status(item_id, ItemStatus::Failed);
    }

    fn announce_retry(
        &self,
        ctx: &ProcessingContext,
        item_id: &str,
        attempt: u32,
        classification: &ErrorClassification,
    ) {
        debug!(
            "{} attempt {} failed ({}), retrying in {:?}",
            item_id,
            attempt,
            classification.kind,
            self.config.backoff_for(attempt)
        );
        ctx.set_status(item_id, ItemStatus::Retrying);
        ctx.info(&classification.user_message);
    }

    fn cancelled<T>(
        &self,
        item_id: &str,
        attempts: u32,
        last_failure: Option<ErrorClassification>,
    ) -> RetryOutcome<T> {
        debug!("{} cancelled after {} attempt(s)", item_id, attempts);
        RetryOutcome::Cancelled {
            attempts,
            last_failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::classifier::ErrorKind;
    use crate::engine::context::ItemState;
    use crate::engine::observer::{NullObserver, RecordingObserver};
    use std::io;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn handler(max_attempts: u32) -> RetryHandler {
        RetryHandler::new(RetryConfig::no_wait(max_attempts).unwrap())
    }

    fn context() -> ProcessingContext {
        ProcessingContext::new(10, Arc::new(NullObserver))
    }

    /// Fails with `message` for the first `failures` calls, then returns `value`
    fn flaky<T: Clone>(
        failures: u32,
        message: &'static str,
        value: T,
    ) -> (impl FnMut() -> std::result::Result<T, OperationError>, Arc<Mutex<u32>>) {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let op = move || {
            let mut calls = counter.lock().unwrap();
            *calls += 1;
            if *calls <= failures {
                Err(OperationError::new(message))
            } else {
                Ok(value.clone())
            }
        };
        (op, calls)
    }

    #[test]
    fn test_first_attempt_success() {
        let handler = handler(3);
        let ctx = context();
        let outcome = handler.execute_with_retry(|| Ok::<_, OperationError>(7), &ctx, "a");

        assert_eq!(outcome, RetryOutcome::Succeeded { value: 7, attempts: 1 });
        let stats = handler.stats();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.successful_retries, 0);
        assert!(!stats.has_retry_activity());
    }

    #[test]
    fn test_success_after_retry_is_success() {
        for k in 2..=4 {
            let handler = handler(4);
            let ctx = context();
            let (op, calls) = flaky(k - 1, "file is locked", format!("value-{k}"));

            let outcome = handler.execute_with_retry(op, &ctx, "a");
            let (success, value, classification) = outcome.into_parts();

            assert!(success, "attempt {k} success must be reported as success");
            assert_eq!(value, Some(format!("value-{k}")));
            assert_eq!(classification, None);
            assert_eq!(*calls.lock().unwrap(), k);

            let stats = handler.stats();
            assert_eq!(stats.successful_retries, 1);
            assert_eq!(stats.failed_retries, 0);
            assert_eq!(stats.total_attempts, u64::from(k));
            assert_eq!(stats.recoverable_errors_encountered, u64::from(k - 1));
            assert_eq!(stats.files_with_recoverable_issues, 1);
        }
    }

    #[test]
    fn test_permission_denied_then_success() {
        let handler = handler(3);
        let observer = Arc::new(RecordingObserver::new());
        let ctx = ProcessingContext::new(1, observer.clone());
        let mut calls = 0;

        ctx.start_item("scan.pdf").unwrap();
        let outcome = handler.execute_with_retry(
            || {
                calls += 1;
                if calls == 1 {
                    Err(io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied"))
                } else {
                    Ok("ok")
                }
            },
            &ctx,
            "scan.pdf",
        );
        assert_eq!(outcome.clone().into_parts(), (true, Some("ok"), None));
        outcome.settle(&ctx, "scan.pdf", Some("ok")).unwrap();

        assert_eq!(handler.stats().successful_retries, 1);
        assert_eq!(
            observer.statuses_for("scan.pdf"),
            vec![
                ItemStatus::Processing,
                ItemStatus::Retrying,
                ItemStatus::Recovered,
                ItemStatus::Completed
            ]
        );
        assert!(observer.infos().contains(&"Successfully processed after retry".to_string()));
        assert!(observer.errors().is_empty());

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 0);
        assert_eq!(snapshot.success_rate, 100.0);
    }

    #[test]
    fn test_permanent_error_fails_fast() {
        let handler = handler(3);
        let ctx = context();
        let (op, calls) = flaky(u32::MAX, "unsupported file format", ());

        let outcome = handler.execute_with_retry(op, &ctx, "a.xyz");
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(outcome.attempts(), 1);

        let (success, value, classification) = outcome.into_parts();
        assert!(!success);
        assert_eq!(value, None);
        assert_eq!(classification.unwrap().kind, ErrorKind::UnsupportedFormat);

        let stats = handler.stats();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.permanent_errors, 1);
        assert_eq!(stats.successful_retries, 0);
        assert_eq!(stats.failed_retries, 0);
        assert_eq!(stats.recoverable_errors_encountered, 0);
    }

    #[test]
    fn test_retry_exhaustion() {
        let handler = handler(3);
        let observer = Arc::new(RecordingObserver::new());
        let ctx = ProcessingContext::new(1, observer.clone());
        let (op, calls) = flaky(u32::MAX, "connection reset", 0u8);

        ctx.start_item("a").unwrap();
        let outcome = handler.execute_with_retry(op, &ctx, "a");
        assert_eq!(*calls.lock().unwrap(), 3);
        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(
            outcome.classification().map(|c| c.kind),
            Some(ErrorKind::RecoverableTransient)
        );

        let stats = handler.stats();
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.failed_retries, 1);
        assert_eq!(stats.recoverable_errors_encountered, 3);
        assert_eq!(stats.files_with_recoverable_issues, 1);
        assert_eq!(stats.successful_retries, 0);

        // one info per retry; the error arrives with the terminal call
        assert_eq!(observer.infos().len(), 2);
        assert!(observer.errors().is_empty());

        outcome.settle(&ctx, "a", None).unwrap();
        let errors = observer.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("a: network or timeout issue"));
        assert_eq!(
            observer.statuses_for("a"),
            vec![
                ItemStatus::Processing,
                ItemStatus::Retrying,
                ItemStatus::Retrying,
                ItemStatus::Failed
            ]
        );
    }

    #[test]
    fn test_last_classification_is_reported() {
        let handler = handler(2);
        let ctx = context();
        let mut calls = 0;
        let outcome: RetryOutcome<()> = handler.execute_with_retry(
            || {
                calls += 1;
                if calls == 1 {
                    Err("OneDrive sync conflict")
                } else {
                    Err("file is locked")
                }
            },
            &ctx,
            "a",
        );
        assert_eq!(outcome.classification().unwrap().kind, ErrorKind::FileLocked);
    }

    #[test]
    fn test_single_attempt_budget() {
        let handler = handler(1);
        let ctx = context();
        let (op, calls) = flaky(1, "timeout", 1);
        let outcome = handler.execute_with_retry(op, &ctx, "a");
        assert!(!outcome.is_success());
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(handler.stats().failed_retries, 1);
    }

    #[test]
    fn test_linear_backoff_timing() {
        let handler = RetryHandler::new(RetryConfig::new(3, 0.02).unwrap());
        let ctx = context();
        let (op, _) = flaky(u32::MAX, "network unreachable", ());

        let start = Instant::now();
        let _ = handler.execute_with_retry(op, &ctx, "a");
        // 0.02 * 1 + 0.02 * 2, no sleep after the final attempt
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_cancelled_before_first_attempt() {
        let handler = handler(3);
        let ctx = context();
        ctx.cancel();
        let mut calls = 0;
        let outcome = handler.execute_with_retry(
            || {
                calls += 1;
                Ok::<_, OperationError>(())
            },
            &ctx,
            "a",
        );
        assert_eq!(calls, 0);
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.attempts(), 0);
        assert_eq!(handler.stats().total_attempts, 0);
    }

    #[test]
    fn test_cancelled_before_backoff() {
        let handler = handler(5);
        let ctx = context();
        let token = ctx.cancellation_token();
        let mut calls = 0;
        let outcome: RetryOutcome<()> = handler.execute_with_retry(
            || {
                calls += 1;
                token.cancel();
                Err("timeout")
            },
            &ctx,
            "a",
        );
        assert_eq!(calls, 1);
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(
            outcome.classification().map(|c| c.kind),
            Some(ErrorKind::RecoverableTransient)
        );

        ctx.start_item("b").unwrap();
        outcome.settle(&ctx, "b", None).unwrap();
        assert_eq!(ctx.item_state("b"), Some(ItemState::Failed));
        assert_eq!(ctx.ledger()[0].reason.as_deref(), Some(CANCELLED_REASON));
    }

    #[test]
    fn test_settle_failure_uses_classification() {
        let handler = handler(3);
        let ctx = context();
        ctx.start_item("a.xyz").unwrap();
        let outcome: RetryOutcome<()> =
            handler.execute_with_retry(|| Err("unsupported format"), &ctx, "a.xyz");
        outcome.settle(&ctx, "a.xyz", None).unwrap();

        let ledger = ctx.ledger();
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger[0].reason.as_deref(),
            Some("unsupported file format, skipping (unsupported format)")
        );
        assert_eq!(ctx.snapshot().failed, 1);
    }

    #[test]
    fn test_stats_accumulate_across_items() {
        let handler = handler(3);
        let ctx = context();

        let (op, _) = flaky(1, "permission denied", ());
        assert!(handler.execute_with_retry(op, &ctx, "a").is_success());
        let (op, _) = flaky(u32::MAX, "corrupt header", ());
        assert!(!handler.execute_with_retry(op, &ctx, "b").is_success());
        let (op, _) = flaky(u32::MAX, "file is locked", ());
        assert!(!handler.execute_with_retry(op, &ctx, "c").is_success());

        assert_eq!(
            handler.stats(),
            RetryStats {
                total_attempts: 2 + 1 + 3,
                successful_retries: 1,
                failed_retries: 1,
                recoverable_errors_encountered: 1 + 3,
                permanent_errors: 1,
                files_with_recoverable_issues: 2,
            }
        );
    }
}
