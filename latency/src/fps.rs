//! FPS Tracker (SPEC_FULL §C.1): a rolling target-vs-actual control
//! frequency estimate, logged alongside the Latency Tracker so operators
//! can see the loop falling behind its nominal rate.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;

const DEFAULT_WINDOW: usize = 32;

struct State {
    last_tick: Option<Instant>,
    intervals: VecDeque<f64>,
}

pub struct FpsTracker {
    target_fps: f64,
    window: usize,
    state: Mutex<State>,
}

/// Target vs. measured control frequency over the retained window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FpsMetrics {
    pub target_fps: f64,
    pub actual_fps: f64,
}

impl FpsTracker {
    pub fn new(target_fps: f64) -> Self {
        Self::with_window(target_fps, DEFAULT_WINDOW)
    }

    pub fn with_window(target_fps: f64, window: usize) -> Self {
        assert!(window > 0, "fps tracker window must be non-zero");
        Self {
            target_fps,
            window,
            state: Mutex::new(State {
                last_tick: None,
                intervals: VecDeque::with_capacity(window),
            }),
        }
    }

    /// Records a tick boundary. The first call only seeds the clock and
    /// contributes no sample.
    pub fn tick(&self, now: Instant) {
        let mut state = self.state.lock();
        if let Some(prev) = state.last_tick {
            let dt = now.duration_since(prev).as_secs_f64();
            if state.intervals.len() == self.window {
                state.intervals.pop_front();
            }
            state.intervals.push_back(dt);
        }
        state.last_tick = Some(now);
    }

    /// Mean measured frequency over the retained window, and the
    /// configured target, for logging (§C.1).
    pub fn calculate_fps_metrics(&self) -> FpsMetrics {
        let state = self.state.lock();
        let actual_fps = if state.intervals.is_empty() {
            self.target_fps
        } else {
            let mean_dt: f64 = state.intervals.iter().sum::<f64>() / state.intervals.len() as f64;
            if mean_dt > 0.0 {
                1.0 / mean_dt
            } else {
                self.target_fps
            }
        };
        FpsMetrics {
            target_fps: self.target_fps,
            actual_fps,
        }
    }
}
