/*!
# Engine Module

Building blocks of the retry and accounting engine, leaves first:

* [`classifier`]: maps failures to an [`ErrorKind`] through an ordered rule table
* [`stats`]: retry counters for one handler session
* [`retry`]: the retry loop and its [`RetryOutcome`]
* [`progress`]: batch counters and the per-item ledger
* [`context`]: the per-batch session object and item state machine
* [`observer`]: the notification sink
* [`runner`]: multi-threaded batch execution over a shared context
*/

pub mod cancel;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod observer;
pub mod progress;
pub mod report;
pub mod retry;
pub mod runner;
pub mod stats;

// Re-export key types for easier access
pub use cancel::CancellationToken;
pub use classifier::{
    ClassificationRule, ErrorClassification, ErrorClassifier, ErrorKind, OperationError, classify,
};
pub use config::{BatchConfig, RetryConfig};
pub use context::{ItemState, ProcessingContext};
pub use observer::{ItemStatus, LogObserver, NullObserver, Observer, RecordingObserver};
pub use progress::{ItemRecord, ProgressSnapshot, ProgressStats, RecordStatus};
pub use report::BatchReport;
pub use retry::{CANCELLED_REASON, RetryHandler, RetryOutcome};
pub use runner::{BatchRunner, ItemDisposition, ItemResult};
pub use stats::RetryStats;
