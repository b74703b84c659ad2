#![allow(clippy::unreadable_literal)]

use embassy_time::Duration;

/// Default chunk size pulled from the byte source per fetch.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// How the controller erases the target region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErasePolicy {
    /// Erase each block right before the first chunk that touches it.
    OnFirstTouch,
    /// Erase the whole image span when the session starts. Falls back to
    /// [`ErasePolicy::OnFirstTouch`] when the image size is not known.
    Upfront,
}

/// Delay schedule between failed fetch attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Same delay after every failure.
    Fixed(Duration),
    /// `initial * 2^(attempt - 1)`, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl BackoffPolicy {
    /// Delay to wait after the `attempt`-th consecutive failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed(delay) => delay,
            BackoffPolicy::Exponential { initial, max } => {
                let shift = attempt.saturating_sub(1).min(31);
                let ticks = initial.as_ticks().saturating_mul(1u64 << shift);
                Duration::from_ticks(ticks.min(max.as_ticks()))
            }
        }
    }
}

pub struct RetryConfig {
    /// Consecutive failed fetches tolerated before the session gives up.
    pub max_retries: u32,
    /// Upper bound for the accumulated backoff time of consecutive failures.
    pub retry_timeout: Duration,
    pub backoff: BackoffPolicy,
}

pub struct ProgressConfig {
    /// Minimum percentage advance between two progress events.
    pub min_percent_step: u8,
    /// Minimum time between two progress events.
    pub min_interval: Duration,
}

pub struct StorageConfig {
    /// Number of status polls before a busy device is reported as such.
    pub busy_poll_limit: u32,
}

/// Update session configuration.
pub struct UpdateConfig {
    /// Timeout applied to every single fetch attempt.
    pub fetch_timeout: Duration,
    pub retry: RetryConfig,
    pub progress: ProgressConfig,
    pub erase_policy: ErasePolicy,
}

impl UpdateConfig {
    pub const DEFAULT: Self = Self {
        fetch_timeout: Duration::from_secs(10),
        retry: RetryConfig {
            max_retries: 5,
            retry_timeout: Duration::from_millis(5000),
            backoff: BackoffPolicy::Fixed(Duration::from_millis(1000)),
        },
        progress: ProgressConfig {
            min_percent_step: 5,
            min_interval: Duration::from_millis(50),
        },
        erase_policy: ErasePolicy::OnFirstTouch,
    };

    pub const fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub const fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry.retry_timeout = timeout;
        self
    }

    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.retry.backoff = backoff;
        self
    }

    pub const fn with_progress(mut self, min_percent_step: u8, min_interval: Duration) -> Self {
        self.progress.min_percent_step = min_percent_step;
        self.progress.min_interval = min_interval;
        self
    }

    pub const fn with_erase_policy(mut self, policy: ErasePolicy) -> Self {
        self.erase_policy = policy;
        self
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub const STORAGE: StorageConfig = StorageConfig {
    busy_poll_limit: 100_000,
};
