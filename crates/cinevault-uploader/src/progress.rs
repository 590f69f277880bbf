//! Instantaneous speed and ETA over a sliding window.
//!
//! A lifetime average misleads for paused/resumed sessions, and raw
//! per-completion deltas spike when many parts finish together; smoothing
//! over a short fixed window gives a stable speed and a steady ETA.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const MAX_SAMPLES: usize = 100;

/// Rolling window of byte-completion samples for one session.
///
/// Owned by the session coordinator; part completions are recorded from its
/// single-threaded loop, so no interior locking is needed.
pub struct ProgressAggregator {
    window: Duration,
    max_samples: usize,
    samples: VecDeque<(Instant, u64)>,
}

impl ProgressAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            max_samples: MAX_SAMPLES,
            samples: VecDeque::new(),
        }
    }

    /// Records `bytes` completed at the current instant and prunes samples
    /// outside the window.
    pub fn record(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back((now, bytes));
        self.prune(now);
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    fn prune(&mut self, now: Instant) {
        let cutoff = now.checked_sub(self.window);
        if let Some(cutoff) = cutoff {
            while let Some(&(at, _)) = self.samples.front() {
                if at < cutoff {
                    self.samples.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Average speed in bytes/second across the window; 0.0 with fewer than
    /// two samples.
    pub fn speed_bytes_per_sec(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let (first, _) = self.samples[0];
        let (last, _) = self.samples[self.samples.len() - 1];
        let elapsed = last.duration_since(first);
        if elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|&(_, b)| b).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to transfer `remaining_bytes`; `None` at zero speed.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.speed_bytes_per_sec();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all samples. Called on pause/resume so a resumed session does
    /// not inherit stale speed.
    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
