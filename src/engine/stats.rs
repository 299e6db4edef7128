use serde::{Deserialize, Serialize};

/// Retry counters for one handler session
///
/// Counters only ever grow. A fresh set of counters means a fresh
/// [`RetryHandler`](crate::RetryHandler).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStats {
    /// Every invocation of an operation, first attempts included
    pub total_attempts: u64,
    /// Items that succeeded on an attempt after the first
    pub successful_retries: u64,
    /// Items that were still failing with a recoverable error when attempts ran out
    pub failed_retries: u64,
    /// Recoverable failures, counted per attempt
    pub recoverable_errors_encountered: u64,
    /// Items that failed fast with a permanent error
    pub permanent_errors: u64,
    /// Items whose first attempt hit a recoverable error
    pub files_with_recoverable_issues: u64,
}

impl RetryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any retry activity happened at all
    pub fn has_retry_activity(&self) -> bool {
        self.files_with_recoverable_issues > 0
    }

    /// Human readable one-liner, e.g. for a CLI footer
    pub fn summary(&self) -> String {
        format!(
            "{} item(s) recovered after retry, {} exhausted retries, {} failed permanently ({} attempts)",
            self.successful_retries, self.failed_retries, self.permanent_errors, self.total_attempts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_zeroed() {
        let stats = RetryStats::new();
        assert_eq!(stats, RetryStats::default());
        assert_eq!(stats.total_attempts, 0);
        assert!(!stats.has_retry_activity());
    }

    #[test]
    fn test_summary() {
        // one item recovered on attempt 2, one exhausted after 3 attempts
        let stats = RetryStats {
            total_attempts: 5,
            successful_retries: 1,
            failed_retries: 1,
            recoverable_errors_encountered: 4,
            permanent_errors: 0,
            files_with_recoverable_issues: 2,
        };
        assert!(stats.has_retry_activity());
        assert_eq!(
            stats.summary(),
            "1 item(s) recovered after retry, 1 exhausted retries, 0 failed permanently (5 attempts)"
        );
    }
}
