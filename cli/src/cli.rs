use clap::{Parser, ValueEnum};

use guidance::PrefixAttentionSchedule;
use runtime::{RtcConfig, RuntimeConfig};

#[derive(Debug, Clone, ValueEnum)]
pub enum ScheduleArg {
    Zeros,
    Ones,
    Linear,
    Exp,
}

impl From<ScheduleArg> for PrefixAttentionSchedule {
    fn from(s: ScheduleArg) -> Self {
        match s {
            ScheduleArg::Zeros => PrefixAttentionSchedule::Zeros,
            ScheduleArg::Ones => PrefixAttentionSchedule::Ones,
            ScheduleArg::Linear => PrefixAttentionSchedule::Linear,
            ScheduleArg::Exp => PrefixAttentionSchedule::Exp,
        }
    }
}

/// RTC robot control session (§6 CLI surface).
#[derive(Debug, Parser)]
#[clap(name = "rtc", version)]
pub struct Cli {
    /// Path to the pretrained policy checkpoint.
    #[clap(long = "policy.path")]
    pub policy_path: String,

    /// Device the policy runs on ("cpu", "cuda:0", ...).
    #[clap(long = "policy.device", default_value = "cpu")]
    pub policy_device: String,

    /// Robot driver identifier.
    #[clap(long = "robot.type")]
    pub robot_type: String,

    /// Serial/USB port the robot is attached to.
    #[clap(long = "robot.port")]
    pub robot_port: Option<String>,

    /// Comma-separated camera identifiers.
    #[clap(long = "robot.cameras", value_delimiter = ',')]
    pub robot_cameras: Vec<String>,

    /// Robot instance identifier, for logging and checkpoint selection.
    #[clap(long = "robot.id")]
    pub robot_id: Option<String>,

    /// Natural-language task description attached to every observation.
    #[clap(long)]
    pub task: String,

    /// Session duration in seconds.
    #[clap(long, default_value = "30.0")]
    pub duration: f64,

    /// Actuator loop control frequency (Hz).
    #[clap(long, default_value = "30.0")]
    pub fps: f64,

    /// Queue-size threshold that triggers a new inference call (§4.6).
    #[clap(long, default_value = "0")]
    pub action_queue_size_to_get_new_actions: usize,

    /// Enables Real-Time Chunking guidance (§4.2).
    #[clap(long = "rtc.enabled", default_value = "false")]
    pub rtc_enabled: bool,

    /// Number of actions at the head of a new chunk corrected by guidance.
    #[clap(long = "rtc.execution_horizon", default_value = "0")]
    pub rtc_execution_horizon: usize,

    #[clap(long = "rtc.max_guidance_weight", default_value = "5.0")]
    pub rtc_max_guidance_weight: f64,

    #[clap(long = "rtc.prefix_attention_schedule", value_enum, default_value = "exp")]
    pub rtc_prefix_attention_schedule: ScheduleArg,

    /// Retains per-step guidance internals for offline inspection (§C.4).
    #[clap(long = "rtc.debug", default_value = "false")]
    pub rtc_debug: bool,

    /// If set, runs as a networked client against a remote policy server
    /// instead of running inference locally (§4.7).
    #[clap(long)]
    pub server_address: Option<String>,

    /// Host to bind when running as the policy server itself.
    #[clap(long)]
    pub host: Option<String>,

    #[clap(long)]
    pub port: Option<u16>,

    /// Assumed one-way inference latency used to pre-stamp timesteps
    /// when operating in networked mode (§4.7).
    #[clap(long, default_value = "0.0")]
    pub inference_latency: f64,

    /// How long the server waits for a fresh observation before replying
    /// with an empty chunk (§4.7).
    #[clap(long, default_value = "0.5")]
    pub obs_queue_timeout: f64,

    /// Client-side buffer occupancy below which a new observation is sent
    /// (§5 Backpressure).
    #[clap(long, default_value = "5")]
    pub chunk_size_threshold: usize,

    #[clap(long, default_value = "replace_with_newest")]
    pub aggregate_fn_name: String,

    #[clap(long, default_value = "50")]
    pub actions_per_chunk: usize,
}

impl Cli {
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            fps: self.fps,
            action_queue_size_to_get_new_actions: self.action_queue_size_to_get_new_actions,
            task: self.task.clone(),
            robot_type: self.robot_type.clone(),
            rtc: if self.rtc_enabled {
                RtcConfig {
                    enabled: true,
                    execution_horizon: self.rtc_execution_horizon,
                    max_guidance_weight: self.rtc_max_guidance_weight,
                    prefix_attention_schedule: self.rtc_prefix_attention_schedule.clone().into(),
                    debug: self.rtc_debug,
                }
            } else {
                RtcConfig::disabled()
            },
        }
    }
}
