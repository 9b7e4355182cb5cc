use guidance::PrefixAttentionSchedule;

/// RTC-specific knobs (§4.2, §6 `--rtc.*`).
#[derive(Clone, Debug)]
pub struct RtcConfig {
    pub enabled: bool,
    pub execution_horizon: usize,
    pub max_guidance_weight: f64,
    pub prefix_attention_schedule: PrefixAttentionSchedule,

    /// Retains per-step guidance internals in a [`guidance::GuidanceTracker`]
    /// for offline inspection (SPEC_FULL §C.4). Off by default.
    pub debug: bool,
}

impl RtcConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            execution_horizon: 0,
            max_guidance_weight: 0.0,
            prefix_attention_schedule: PrefixAttentionSchedule::Zeros,
            debug: false,
        }
    }
}

/// Session-wide control loop configuration (§4.5, §4.6, §6).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Control frequency the actuator loop drives the robot at.
    pub fps: f64,

    /// Queue-size threshold that triggers a new inference call. Forced to
    /// `0` when RTC is disabled (§4.6 Parameters) — the loop then waits for
    /// the queue to empty before refilling.
    pub action_queue_size_to_get_new_actions: usize,

    /// Task description string attached to every observation (§4.6 step 4).
    pub task: String,

    /// Robot type identifier attached to every observation (§4.6 step 4).
    pub robot_type: String,

    pub rtc: RtcConfig,
}

impl RuntimeConfig {
    /// The effective inference-trigger threshold, honoring RTC's override
    /// (§4.6 Parameters).
    pub fn threshold(&self) -> usize {
        if self.rtc.enabled {
            self.action_queue_size_to_get_new_actions
        } else {
            0
        }
    }

    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.fps)
    }
}
