//! Latency Tracker (§4.4): a conservative, bounded-history estimate of
//! inference wall-clock duration, used by the inference loop to predict how
//! many ticks a chunk's leading actions will be consumed by before it lands.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::instrument;

mod fps;
pub use fps::{FpsMetrics, FpsTracker};

const DEFAULT_WINDOW: usize = 8;

/// Thread-safe tracker of the maximum observed inference duration over a
/// small recent window. Single-producer (the inference loop), any number of
/// readers.
pub struct LatencyTracker {
    window: usize,
    samples: Mutex<VecDeque<f64>>,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl LatencyTracker {
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "latency tracker window must be non-zero");
        Self {
            window,
            samples: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    /// Records one observed duration in seconds. Must be positive.
    #[instrument(skip(self), target = "latency")]
    pub fn add(&self, sample_secs: f64) {
        debug_assert!(sample_secs > 0.0, "latency sample must be positive");
        let mut samples = self.samples.lock();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(sample_secs);
    }

    /// Maximum duration over the retained window, or `0.0` if no samples
    /// have been recorded yet (§4.4).
    pub fn max(&self) -> f64 {
        self.samples
            .lock()
            .iter()
            .copied()
            .fold(0.0, f64::max)
    }

    /// `ceil(latency / tick_period)` — the number of ticks a duration
    /// converts to at the given control frequency (§4.4, §4.6 step 3/9).
    pub fn to_ticks(duration_secs: f64, fps: f64) -> u64 {
        (duration_secs * fps).ceil().max(0.0) as u64
    }
}
