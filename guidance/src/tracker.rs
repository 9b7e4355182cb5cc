//! Debug/guidance tracker (SPEC_FULL §C.4): an optional, bounded ring
//! buffer of per-step guidance internals for offline inspection. Mirrors
//! the reference implementation's `RTCConfig.debug` flag — off by
//! default, carrying no cost on the hot path when disabled.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Scalar summary of one [`crate::denoise_step`] call, cheap enough to
/// retain a meaningful window of without holding onto tensors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GuidanceStepRecord {
    pub t: f64,
    pub tau: f64,
    pub guidance_weight: f64,
    pub x1_mean: f64,
    pub err_mean: f64,
    pub weight_mean: f64,
}

/// Bounded ring buffer of recent [`GuidanceStepRecord`]s. Disabled
/// trackers (`enabled = false`) discard every `record` call, so call
/// sites can unconditionally pass a tracker without branching.
pub struct GuidanceTracker {
    enabled: bool,
    capacity: usize,
    records: Mutex<VecDeque<GuidanceStepRecord>>,
}

impl GuidanceTracker {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            capacity: 0,
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enabled(capacity: usize) -> Self {
        assert!(capacity > 0, "guidance tracker capacity must be non-zero");
        Self {
            enabled: true,
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn record(&self, rec: GuidanceStepRecord) {
        if !self.enabled {
            return;
        }
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(rec);
    }

    /// Snapshot of all currently retained records, oldest first.
    pub fn snapshot(&self) -> Vec<GuidanceStepRecord> {
        self.records.lock().iter().copied().collect()
    }
}
