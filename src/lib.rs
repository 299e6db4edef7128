/*!
# Retryledger-rs

Retry execution with failure classification and exactly-once progress accounting for
batches of fallible operations, such as processing and renaming a folder of documents.

## Overview

A batch is a known, finite list of items. Each item is handled by a caller-supplied
operation that may fail for transient reasons (an antivirus scan holding the file, a
sync client rewriting it, a flaky network) or for permanent ones (an unsupported format).
The engine retries the former with linear backoff, fails fast on the latter, and keeps
race-free counters so the final report matches what actually happened, including items
that only succeeded after a retry.

## Key Components

* **ErrorClassifier**: maps a failure onto one of six `ErrorKind`s, first rule wins
* **RetryHandler**: runs an operation, retries recoverable failures, counts `RetryStats`
* **ProcessingContext**: per-batch session with `start_item`, `complete_item`,
  `fail_item`, `skip_item` and `warn`, backed by `ProgressStats` and its ledger
* **Observer**: sink for status changes and messages
* **BatchRunner**: processes a list of items on several threads over one shared context

## Usage Example

```rust,no_run
use retryledger_rs::{LogObserver, OperationError, ProcessingContext, RetryConfig, RetryHandler};
use std::sync::Arc;

fn rename(path: &str) -> Result<String, OperationError> {
    // extract content, ask for a name, move the file...
    Ok(format!("{path}.renamed"))
}

fn main() -> retryledger_rs::Result<()> {
    let files = vec!["a.pdf".to_string(), "b.docx".to_string()];
    let handler = RetryHandler::new(RetryConfig::new(3, 1.0)?);
    let ctx = ProcessingContext::new(files.len() as u64, Arc::new(LogObserver));

    for file in &files {
        ctx.start_item(file)?;
        let outcome = handler.execute_with_retry(|| rename(file), &ctx, file);
        let target = outcome.value().cloned();
        outcome.settle(&ctx, file, target.as_deref())?;
    }

    let report = ctx.finish()?.with_retry_stats(handler.stats());
    println!("{}", report.summary_line());
    std::process::exit(report.exit_code());
}
```

## Error Handling

Failures of the operation never propagate as errors. They come back inside the
`RetryOutcome`, together with their `ErrorClassification`. `RetryLedgerError` is reserved
for misuse of the engine (a terminal call for an item that was never started or already
finished, items left in flight or missing at the end of a batch) and for invalid
configuration.
*/

pub mod engine;

// Re-export all public APIs for easier access
pub use engine::error::{Result, RetryLedgerError};
pub use engine::{
    BatchConfig, BatchReport, BatchRunner, CANCELLED_REASON, CancellationToken,
    ClassificationRule, ErrorClassification, ErrorClassifier, ErrorKind, ItemDisposition,
    ItemRecord, ItemResult, ItemState, ItemStatus, LogObserver, NullObserver, Observer,
    OperationError, ProcessingContext, ProgressSnapshot, ProgressStats, RecordStatus,
    RecordingObserver, RetryConfig, RetryHandler, RetryOutcome, RetryStats, classify,
};
