use embassy_time::{Duration, Instant};

use crate::config::ProgressConfig;
use crate::domain::entity::ProgressSample;

/// Rate limiter for progress events.
///
/// A sample passes when the percentage advanced by at least `min_percent_step`
/// and at least `min_interval` elapsed since the last emitted sample. Reaching
/// 100 % always passes, once per session. Images of unknown size have no
/// meaningful percentage, so their samples are gated by time only.
#[derive(Debug, Clone)]
pub struct ProgressGate {
    min_step: u8,
    min_interval: Duration,
    last_percent: u8,
    last_at: Option<Instant>,
    finished: bool,
}

impl ProgressGate {
    pub fn new(config: &ProgressConfig) -> Self {
        Self {
            min_step: config.min_percent_step,
            min_interval: config.min_interval,
            last_percent: 0,
            last_at: None,
            finished: false,
        }
    }

    /// Returns the sample back when it should be reported.
    pub fn offer(&mut self, sample: ProgressSample) -> Option<ProgressSample> {
        let percent = sample.percent();
        if percent >= 100 {
            return self.finish(sample);
        }

        if let Some(last_at) = self.last_at {
            let Some(elapsed) = sample.at.checked_duration_since(last_at) else {
                // Clock went backwards, restart the interval from here
                self.last_at = Some(sample.at);
                return None;
            };
            if elapsed < self.min_interval {
                return None;
            }
        }

        let advanced = match sample.bytes_total {
            Some(_) => percent.saturating_sub(self.last_percent) >= self.min_step,
            None => true,
        };
        if !advanced {
            return None;
        }

        self.record(&sample);
        Some(sample)
    }

    /// Final 100 % sample. Passes unless 100 % was already reported.
    pub fn finish(&mut self, sample: ProgressSample) -> Option<ProgressSample> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.record(&sample);
        Some(sample)
    }

    pub fn reset(&mut self) {
        self.last_percent = 0;
        self.last_at = None;
        self.finished = false;
    }

    fn record(&mut self, sample: &ProgressSample) {
        self.last_percent = sample.percent();
        self.last_at = Some(sample.at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ProgressGate {
        ProgressGate::new(&ProgressConfig {
            min_percent_step: 5,
            min_interval: Duration::from_millis(50),
        })
    }

    fn sample(done: u32, total: Option<u32>, at_ms: u64) -> ProgressSample {
        ProgressSample {
            bytes_done: done,
            bytes_total: total,
            at: Instant::from_millis(at_ms),
        }
    }

    #[test]
    fn needs_both_step_and_interval() {
        let mut gate = gate();

        assert!(gate.offer(sample(100, Some(1000), 10)).is_some());
        // step reached, interval not
        assert!(gate.offer(sample(200, Some(1000), 20)).is_none());
        // interval reached, step not
        assert!(gate.offer(sample(120, Some(1000), 200)).is_none());
        assert!(gate.offer(sample(200, Some(1000), 200)).is_some());
    }

    #[test]
    fn small_first_step_is_held_back() {
        let mut gate = gate();

        assert!(gate.offer(sample(10, Some(1000), 1000)).is_none());
        assert!(gate.offer(sample(50, Some(1000), 1100)).is_some());
    }

    #[test]
    fn completion_always_passes_once() {
        let mut gate = gate();

        assert!(gate.offer(sample(990, Some(1000), 0)).is_some());
        let last = gate.offer(sample(1000, Some(1000), 1)).unwrap();
        assert_eq!(last.percent(), 100);
        assert!(gate.finish(sample(1000, Some(1000), 2)).is_none());
    }

    #[test]
    fn unknown_size_is_time_gated() {
        let mut gate = gate();

        assert!(gate.offer(sample(10, None, 0)).is_some());
        assert!(gate.offer(sample(20, None, 10)).is_none());
        assert!(gate.offer(sample(30, None, 60)).is_some());
    }

    #[test]
    fn reset_allows_a_new_session() {
        let mut gate = gate();

        assert!(gate.finish(sample(8, Some(8), 0)).is_some());
        gate.reset();
        assert!(gate.offer(sample(500, Some(1000), 0)).is_some());
    }
}
