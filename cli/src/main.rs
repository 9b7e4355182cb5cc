pub mod cli;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use common::logger::init_tracing;
use common::AppError;
use queue::ActionQueue;
use runtime::{
    ActuatorLoop, InferenceLoop, Policy, PolicyPostProcessor, PolicyPreProcessor, Robot,
    RobotActionPostProcessor, RobotObservationPostProcessor, Shutdown,
};
use tch::Tensor;
use tokio::sync::Mutex as AsyncMutex;

use cli::Cli;

/// Stand-in robot used until a real hardware driver is wired in for
/// `--robot.type`. Mirrors `DummySwapExecutor` in the execution backend:
/// it satisfies the trait boundary so the control loops can be exercised
/// end to end without real I/O.
struct DummyRobot {
    observation_features: Vec<String>,
    action_features: Vec<String>,
}

#[async_trait]
impl Robot for DummyRobot {
    fn name(&self) -> &str {
        "dummy"
    }

    fn observation_features(&self) -> &[String] {
        &self.observation_features
    }

    fn action_features(&self) -> &[String] {
        &self.action_features
    }

    async fn connect(&mut self) -> Result<(), AppError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), AppError> {
        Ok(())
    }

    async fn get_observation(&mut self) -> Result<HashMap<String, Tensor>, AppError> {
        let mut obs = HashMap::new();
        for name in &self.observation_features {
            obs.insert(name.clone(), Tensor::zeros([1], (tch::Kind::Float, tch::Device::Cpu)));
        }
        Ok(obs)
    }

    async fn send_action(
        &mut self,
        action: &HashMap<String, f32>,
    ) -> Result<Option<HashMap<String, f32>>, AppError> {
        Ok(Some(action.clone()))
    }
}

/// Stand-in policy; real checkpoint loading (`--policy.path`) is a
/// collaborator concern out of this crate's scope.
struct DummyPolicy {
    chunk_size: i64,
    action_dim: i64,
}

#[async_trait]
impl Policy for DummyPolicy {
    async fn predict_action_chunk(
        &self,
        _obs: &Tensor,
        _inference_delay: u64,
        _prev_chunk_left_over: Option<&Tensor>,
    ) -> Result<Tensor, AppError> {
        Ok(Tensor::zeros(
            [1, self.chunk_size, self.action_dim],
            (tch::Kind::Float, tch::Device::Cpu),
        ))
    }
}

struct Identity;
impl RobotObservationPostProcessor for Identity {
    fn process(&self, obs: HashMap<String, Tensor>) -> HashMap<String, Tensor> {
        obs
    }
}
impl RobotActionPostProcessor for Identity {
    fn process(&self, action: &HashMap<String, f32>) -> HashMap<String, f32> {
        action.clone()
    }
}
impl PolicyPreProcessor for Identity {
    fn process(&self, obs: &Tensor) -> Tensor {
        obs.shallow_clone()
    }
}
impl PolicyPostProcessor for Identity {
    fn process(&self, raw_chunk: &Tensor) -> Tensor {
        raw_chunk.shallow_clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    let cli = Cli::parse();
    let config = cli.runtime_config();

    if let Some(server_address) = &cli.server_address {
        tracing::info!(%server_address, "networked mode is wired via the net crate's RobotClientConnection; see net::client for the buffer and must_go logic");
        return Ok(());
    }

    let queue = Arc::new(ActionQueue::new());
    let shutdown = Shutdown::new();

    let observation_features = vec!["joint_0".to_string(), "joint_1".to_string()];
    let action_features = observation_features.clone();

    let robot = Arc::new(AsyncMutex::new(DummyRobot {
        observation_features,
        action_features,
    }));

    let policy = Arc::new(DummyPolicy {
        chunk_size: cli.actions_per_chunk as i64,
        action_dim: 2,
    });

    let latency_tracker = Arc::new(latency::LatencyTracker::default());

    let actuator = ActuatorLoop::new(
        queue.clone(),
        robot.clone(),
        Arc::new(Identity),
        config.tick_period(),
        shutdown.clone(),
    );

    let inference = InferenceLoop::new(
        queue,
        robot,
        policy,
        Arc::new(Identity),
        Arc::new(Identity),
        Arc::new(Identity),
        latency_tracker,
        config,
        shutdown.clone(),
    );

    let actuator_handle = tokio::spawn(actuator.run());
    let inference_handle = tokio::spawn(inference.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            shutdown.request();
        }
        res = actuator_handle => {
            if let Ok(Err(e)) = res {
                tracing::error!(error = ?e, "actuator loop exited with error");
            }
        }
        res = inference_handle => {
            if let Ok(Err(e)) = res {
                tracing::error!(error = ?e, "inference loop exited with error");
            }
        }
    }

    Ok(())
}
