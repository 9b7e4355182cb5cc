use thiserror::Error;

/// Fatal error kinds shared across the control pipeline (see §7 of the spec).
///
/// Soft warnings (queue underflow, dropped-by-similarity observations, a
/// threshold below `execution_horizon + measured_delay`) are logged, not
/// modeled as `AppError` variants — they never stop a loop.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("robot I/O failed: {0}")]
    RobotIo(String),

    #[error("policy inference failed: {0}")]
    InferenceFailure(String),

    #[error("network failure: {0}")]
    NetworkFailure(String),
}
