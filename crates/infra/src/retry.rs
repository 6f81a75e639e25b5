//! Bounded retry for contention errors.
//!
//! Only `DomainError::Conflict` is retried. Everything else is deterministic
//! and would fail the same way again.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use stockforge_core::DomainResult;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    #[default]
    Exponential,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one (1 = no retries)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0). Each delay is spread by up to this fraction
    /// either way, so contending callers do not retry in lockstep.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(20), Duration::from_millis(500))
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1) as i32);
                (base_ms * exp).min(max_ms)
            }
        };

        let jitter_range = delay_ms * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            jitter_range * (rand::random::<f64>() * 2.0 - 1.0)
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `attempts_made` tries.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Run `op`, retrying retriable errors with backoff until the policy is exhausted.
    ///
    /// `op` receives the 1-based attempt number. The last error is returned
    /// unchanged when attempts run out.
    pub fn run<T>(&self, mut op: impl FnMut(u32) -> DomainResult<T>) -> DomainResult<T> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() && self.should_retry(attempt) => {
                    let delay = self.delay_for_attempt(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after conflict");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockforge_core::DomainError;

    #[test]
    fn exponential_delays_are_capped() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::exponential(5, Duration::from_millis(10), Duration::from_millis(35))
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(35));
    }

    #[test]
    fn jitter_spreads_delays_within_bounds() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::fixed(3, Duration::from_millis(100))
        };
        let delays: Vec<Duration> = (0..64).map(|_| policy.delay_for_attempt(1)).collect();
        assert!(delays
            .iter()
            .all(|d| *d >= Duration::from_millis(50) && *d <= Duration::from_millis(150)));
        assert!(delays.iter().any(|d| *d != delays[0]));
    }

    #[test]
    fn retries_conflicts_until_success() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        let mut calls = 0;
        let out = policy.run(|attempt| {
            calls += 1;
            if attempt < 3 {
                Err(DomainError::conflict("busy"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(1));
        let mut calls = 0;
        let out: DomainResult<()> = policy.run(|_| {
            calls += 1;
            Err(DomainError::conflict("busy"))
        });
        assert!(matches!(out, Err(DomainError::Conflict(_))));
        assert_eq!(calls, 2);
    }

    #[test]
    fn non_retriable_errors_fail_fast() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));
        let mut calls = 0;
        let out: DomainResult<()> = policy.run(|_| {
            calls += 1;
            Err(DomainError::validation("bad"))
        });
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }
}
