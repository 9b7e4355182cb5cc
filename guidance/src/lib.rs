mod schedule;
mod step;
mod tracker;

pub use schedule::{prefix_weights, PrefixAttentionSchedule};
pub use step::{denoise_step, BaseDenoiser, GuidanceError};
pub use tracker::{GuidanceStepRecord, GuidanceTracker};
