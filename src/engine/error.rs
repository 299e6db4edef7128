use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the retry and accounting engine
///
/// Failures of the caller-supplied operation never show up here: those are absorbed
/// by the [`RetryHandler`](crate::RetryHandler) and surfaced as a classified outcome.
/// This type covers misuse of the engine itself and invalid configuration.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryLedgerError {
    /// Configuration values outside their allowed range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON configuration could not be parsed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// `start_item` called for an item that is already in flight or finished
    #[error("Item {item_id} already started (state: {state})")]
    AlreadyStarted { item_id: String, state: String },

    /// A second terminal call for an item that already reached a terminal state
    #[error("Item {item_id} already terminated (state: {state})")]
    AlreadyTerminated { item_id: String, state: String },

    /// `complete_item` or `fail_item` for an item that was never started
    #[error("Item {item_id} was never started")]
    NotStarted { item_id: String },

    /// Terminal calls would push succeeded + failed + skipped past the batch total
    #[error("Batch capacity exceeded: {recorded} items recorded, total is {total}")]
    CapacityExceeded { total: u64, recorded: u64 },

    /// Items that were started but never given a terminal state when the batch ended
    #[error("Batch ended with {} unterminated item(s): {}", .0.len(), .0.join(", "))]
    UnterminatedItems(Vec<String>),

    /// Fewer items reached a terminal state than the batch total announced
    #[error("Batch incomplete: {terminated} of {total} item(s) terminated")]
    IncompleteBatch { total: u64, terminated: u64 },

    /// Counters disagree with the item states tracked by the context
    #[error("Batch accounting mismatch: {counted} item(s) counted, {tracked} terminated")]
    AccountingMismatch { counted: u64, tracked: u64 },

    /// The batch was cancelled before the operation could run
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl RetryLedgerError {
    /// Convert from serde_json::Error
    pub fn from_serde(err: serde_json::Error) -> Self {
        RetryLedgerError::Deserialization(err.to_string())
    }

    /// Stable error code for reporting
    pub fn code(&self) -> &'static str {
        match self {
            RetryLedgerError::InvalidConfig(_) => "INVALID_CONFIG",
            RetryLedgerError::Deserialization(_) => "DESERIALIZATION_ERROR",
            RetryLedgerError::AlreadyStarted { .. }
            | RetryLedgerError::AlreadyTerminated { .. }
            | RetryLedgerError::NotStarted { .. } => "CONTRACT_VIOLATION",
            RetryLedgerError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            RetryLedgerError::UnterminatedItems(_) => "UNTERMINATED_ITEMS",
            RetryLedgerError::IncompleteBatch { .. } => "INCOMPLETE_BATCH",
            RetryLedgerError::AccountingMismatch { .. } => "ACCOUNTING_MISMATCH",
            RetryLedgerError::Cancelled(_) => "CANCELLED",
        }
    }

    /// Whether the error points at a caller bug rather than bad input
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            RetryLedgerError::AlreadyStarted { .. }
                | RetryLedgerError::AlreadyTerminated { .. }
                | RetryLedgerError::NotStarted { .. }
                | RetryLedgerError::CapacityExceeded { .. }
                | RetryLedgerError::UnterminatedItems(_)
                | RetryLedgerError::IncompleteBatch { .. }
                | RetryLedgerError::AccountingMismatch { .. }
        )
    }
}

/// Type alias for Result with RetryLedgerError
pub type Result<T> = std::result::Result<T, RetryLedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RetryLedgerError::InvalidConfig("x".to_string()).code(),
            "INVALID_CONFIG"
        );
        assert_eq!(
            RetryLedgerError::AlreadyTerminated {
                item_id: "a.pdf".to_string(),
                state: "completed".to_string(),
            }
            .code(),
            "CONTRACT_VIOLATION"
        );
        assert_eq!(
            RetryLedgerError::Cancelled("shutdown".to_string()).code(),
            "CANCELLED"
        );
    }

    #[test]
    fn test_contract_violations() {
        assert!(RetryLedgerError::UnterminatedItems(vec!["a".to_string()]).is_contract_violation());
        assert!(
            RetryLedgerError::CapacityExceeded {
                total: 2,
                recorded: 2
            }
            .is_contract_violation()
        );
        assert!(!RetryLedgerError::InvalidConfig("bad".to_string()).is_contract_violation());
        let never_started = RetryLedgerError::NotStarted {
            item_id: "ghost.pdf".to_string(),
        };
        assert!(never_started.is_contract_violation());
        assert_eq!(never_started.code(), "CONTRACT_VIOLATION");
        let incomplete = RetryLedgerError::IncompleteBatch {
            total: 2,
            terminated: 1,
        };
        assert!(incomplete.is_contract_violation());
        assert_eq!(
            incomplete.to_string(),
            "Batch incomplete: 1 of 2 item(s) terminated"
        );
    }

    #[test]
    fn test_unterminated_display() {
        let err =
            RetryLedgerError::UnterminatedItems(vec!["a.pdf".to_string(), "b.pdf".to_string()]);
        assert_eq!(
            err.to_string(),
            "Batch ended with 2 unterminated item(s): a.pdf, b.pdf"
        );
    }

    #[test]
    fn test_error_serialization() {
        let err = RetryLedgerError::CapacityExceeded {
            total: 3,
            recorded: 3,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: RetryLedgerError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
