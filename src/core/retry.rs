use embassy_time::Duration;

use crate::config::{BackoffPolicy, RetryConfig};

/// What to do after a failed fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait for the given delay, then fetch again from the same offset.
    RetryAfter(Duration),
    /// Budget is spent, the session must abort.
    Exhausted,
}

/// Consecutive fetch failure accounting for one session.
///
/// Failures are bounded both by count and by the accumulated backoff time.
/// Any successful chunk resets the budget.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_retries: u32,
    retry_timeout: Duration,
    backoff: BackoffPolicy,
    failures: u32,
    waited: Duration,
}

impl RetryBudget {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_timeout: config.retry_timeout,
            backoff: config.backoff,
            failures: 0,
            waited: Duration::from_ticks(0),
        }
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.max_retries {
            return RetryDecision::Exhausted;
        }

        let delay = self.backoff.delay(self.failures);
        match self.waited.checked_add(delay) {
            Some(waited) if waited <= self.retry_timeout => {
                self.waited = waited;
                RetryDecision::RetryAfter(delay)
            }
            _ => RetryDecision::Exhausted,
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.waited = Duration::from_ticks(0);
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Backoff time accumulated since the last success.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}
