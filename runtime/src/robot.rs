//! External robot capability (§6): hardware is a collaborator, not a
//! component this crate owns. Every method that touches the physical
//! device is serialized behind a single mutex in the caller (§5 "Robot
//! handle: wrapped by a mutex").

use std::collections::HashMap;

use async_trait::async_trait;
use common::AppError;
use tch::Tensor;

/// `get_observation` / `send_action` / feature-name lists / `connect` /
/// `disconnect` (§6). Implementations own the transport (serial, CAN,
/// simulator) and must surface hardware faults as [`AppError::RobotIo`].
#[async_trait]
pub trait Robot: Send + Sync {
    fn name(&self) -> &str;

    /// Ordered feature names for observation tensors (image keys carry a
    /// known prefix, e.g. `"observation.images."`).
    fn observation_features(&self) -> &[String];

    /// Ordered feature names for action dimensions, matching [`crate::queue`]'s
    /// per-action vector layout.
    fn action_features(&self) -> &[String];

    async fn connect(&mut self) -> Result<(), AppError>;
    async fn disconnect(&mut self) -> Result<(), AppError>;

    async fn get_observation(&mut self) -> Result<HashMap<String, Tensor>, AppError>;

    /// `action` is name -> command value, already in robot units. Returns
    /// the mapping the robot actually applied, if the hardware reports one.
    async fn send_action(
        &mut self,
        action: &HashMap<String, f32>,
    ) -> Result<Option<HashMap<String, f32>>, AppError>;
}

/// Pure transforms on raw robot I/O, carrying whatever normalization
/// statistics they were built with (§6 "Pre/Post-processor capability").
pub trait RobotObservationPostProcessor: Send + Sync {
    fn process(&self, obs: HashMap<String, Tensor>) -> HashMap<String, Tensor>;
}

pub trait RobotActionPostProcessor: Send + Sync {
    fn process(&self, action: &HashMap<String, f32>) -> HashMap<String, f32>;
}

/// Converts a flat action vector (queue layout) into a robot feature
/// mapping using the robot's declared ordering (§4.5 step 3).
pub fn to_named_action(values: &[f32], feature_names: &[String]) -> HashMap<String, f32> {
    feature_names
        .iter()
        .zip(values.iter())
        .map(|(name, v)| (name.clone(), *v))
        .collect()
}
