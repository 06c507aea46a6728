//! Explicit retry policy for upstream collaborators.
//!
//! Every outbound call to the LLM or the news search API goes through a
//! `RetryPolicy`: bounded retries, exponential backoff capped at
//! `max_delay_ms`, full jitter. Callers decide which errors are retryable;
//! exhaustion is reported by the caller as an upstream failure.

use serde::Deserialize;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    pub fn attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Delay sequence fed to `tokio_retry::RetryIf`.
    pub fn strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(self.retry_delay_ms.max(1))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .map(jitter)
            .take(self.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_is_bounded_by_max_retries() {
        let policy = RetryPolicy {
            max_retries: 4,
            retry_delay_ms: 10,
            max_delay_ms: 50,
        };
        let delays: Vec<Duration> = policy.strategy().collect();
        assert_eq!(delays.len(), 4);
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(50)));
        assert_eq!(policy.attempts(), 5);
    }

    #[test]
    fn test_none_makes_a_single_attempt() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.strategy().count(), 0);
        assert_eq!(policy.attempts(), 1);
    }
}
