use crate::engine::error::{Result, RetryLedgerError};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per item, including the first one
    pub max_attempts: u32,
    /// Base wait in seconds; the wait after attempt `n` is `base_wait_seconds * n`
    pub base_wait_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_wait_seconds: 1.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_wait_seconds: f64) -> Result<Self> {
        let config = Self {
            max_attempts,
            base_wait_seconds,
        };
        config.validate()?;
        Ok(config)
    }

    /// A config that never sleeps between attempts
    pub fn no_wait(max_attempts: u32) -> Result<Self> {
        Self::new(max_attempts, 0.0)
    }

    /// Parse a config from JSON, applying defaults for missing fields
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(RetryLedgerError::from_serde)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RetryLedgerError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.base_wait_seconds.is_finite() || self.base_wait_seconds < 0.0 {
            return Err(RetryLedgerError::InvalidConfig(format!(
                "base_wait_seconds must be a finite, non-negative number (got {})",
                self.base_wait_seconds
            )));
        }
        Ok(())
    }

    /// Calculate the linear backoff delay after the given (1-based) attempt
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let seconds = self.base_wait_seconds * f64::from(attempt);
        if seconds.is_finite() && seconds > 0.0 {
            Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }

    /// Block the calling thread for the backoff delay of `attempt`
    pub fn sleep(&self, attempt: u32) {
        let delay = self.backoff_for(attempt);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// Configuration for a whole batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub retry: RetryConfig,
    /// Number of worker threads used by the [`BatchRunner`](crate::BatchRunner)
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            workers: 1,
        }
    }
}

impl BatchConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(RetryLedgerError::from_serde)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        if self.workers == 0 {
            return Err(RetryLedgerError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
