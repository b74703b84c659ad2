use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;

/// External cancellation request for an update session.
///
/// The flag is polled between states, the signal wakes a session that is
/// waiting on a fetch or a backoff delay.
pub struct AbortSignal<M: RawMutex> {
    requested: AtomicBool,
    signal: Signal<M, ()>,
}

impl<M: RawMutex> AbortSignal<M> {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            signal: Signal::new(),
        }
    }

    pub fn abort(&self) {
        self.requested.store(true, Ordering::Release);
        self.signal.signal(());
    }

    pub fn is_aborted(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Resolves once an abort was requested.
    pub async fn wait(&self) {
        while !self.is_aborted() {
            self.signal.wait().await;
        }
    }

    /// Drops a pending request. Called when a new session starts.
    pub fn clear(&self) {
        self.requested.store(false, Ordering::Release);
        self.signal.reset();
    }
}

impl<M: RawMutex> Default for AbortSignal<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::{
        block_on,
        select::{Either, select},
    };
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use super::*;

    #[test]
    fn wait_returns_after_abort() {
        let signal = AbortSignal::<NoopRawMutex>::new();
        assert!(!signal.is_aborted());

        signal.abort();
        assert!(signal.is_aborted());
        block_on(signal.wait());
    }

    #[test]
    fn clear_drops_the_request() {
        let signal = AbortSignal::<NoopRawMutex>::new();
        signal.abort();
        signal.clear();

        assert!(!signal.is_aborted());
        let res = block_on(select(signal.wait(), core::future::ready(())));
        assert!(matches!(res, Either::Second(())));
    }
}
