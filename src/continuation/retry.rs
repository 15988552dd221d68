//! Retry policy for cluster-reported query errors.

use std::time::Duration;

use super::protocol::QueryError;
use crate::config::schema::{RetryConfig, RetryMode, RetryableError};
use crate::resilience::backoff::calculate_backoff;

/// Decides whether a failed query is resubmitted.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    mode: RetryMode,
    max_retries: u32,
    retry_transport_failures: bool,
    retryable: Vec<RetryableError>,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            mode: config.mode,
            max_retries: config.max_retries,
            retry_transport_failures: config.retry_transport_failures,
            retryable: config.retryable_errors.clone(),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// Policy with no backoff delay.
    pub fn immediate(config: &RetryConfig) -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..Self::from_config(config)
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether the error class is worth a resubmission, ignoring the budget.
    pub fn is_retryable(&self, error: &QueryError) -> bool {
        match self.mode {
            RetryMode::Never => false,
            _ if error.is_step_failure() => self.retry_transport_failures,
            RetryMode::Always => true,
            RetryMode::Classified => self
                .retryable
                .iter()
                .any(|r| r.name == error.error_name || r.code == error.error_code),
        }
    }

    /// Whether to resubmit after `retries_so_far` retries of the same query.
    pub fn should_retry(&self, error: &QueryError, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries && self.is_retryable(error)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
