//! Inference Loop (§4.6): the threshold-driven producer. Keeps the queue
//! filled by invoking the policy whenever its size drops to or below
//! `threshold`, then merges the resulting chunk back under latency
//! compensation (§4.1).

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::AppError;
use latency::{FpsTracker, LatencyTracker};
use queue::{Action, ActionQueue, Chunk};
use tch::Tensor;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use crate::config::RuntimeConfig;
use crate::policy::{Policy, PolicyPostProcessor, PolicyPreProcessor};
use crate::robot::{Robot, RobotObservationPostProcessor};
use crate::shutdown::Shutdown;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often the rolling inference-call-rate metrics are logged
/// (SPEC_FULL §C.1).
const FPS_LOG_EVERY_N_ITERATIONS: u64 = 20;

pub struct InferenceLoop<R: Robot, P: Policy> {
    queue: Arc<ActionQueue>,
    robot: Arc<AsyncMutex<R>>,
    policy: Arc<P>,
    obs_post: Arc<dyn RobotObservationPostProcessor>,
    policy_pre: Arc<dyn PolicyPreProcessor>,
    policy_post: Arc<dyn PolicyPostProcessor>,
    latency_tracker: Arc<LatencyTracker>,
    config: RuntimeConfig,
    shutdown: Shutdown,
    fps_tracker: FpsTracker,
}

impl<R: Robot, P: Policy> InferenceLoop<R, P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<ActionQueue>,
        robot: Arc<AsyncMutex<R>>,
        policy: Arc<P>,
        obs_post: Arc<dyn RobotObservationPostProcessor>,
        policy_pre: Arc<dyn PolicyPreProcessor>,
        policy_post: Arc<dyn PolicyPostProcessor>,
        latency_tracker: Arc<LatencyTracker>,
        config: RuntimeConfig,
        shutdown: Shutdown,
    ) -> Self {
        let fps_tracker = FpsTracker::new(config.fps);
        Self {
            queue,
            robot,
            policy,
            obs_post,
            policy_pre,
            policy_post,
            latency_tracker,
            config,
            shutdown,
            fps_tracker,
        }
    }

    #[instrument(skip(self), target = "inference")]
    pub async fn run(self) -> Result<(), AppError> {
        debug!("inference loop starting");
        let threshold = self.config.threshold();
        let mut iterations: u64 = 0;

        loop {
            if self.shutdown.is_requested() {
                break;
            }

            if self.queue.size() > threshold {
                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => continue,
                    _ = self.shutdown.notified() => break,
                }
            }

            self.fps_tracker.tick(Instant::now());
            if let Err(e) = self.run_one_iteration(threshold).await {
                warn!(error = ?e, "inference iteration failed; shutting down");
                self.shutdown.request();
                return Err(e);
            }

            iterations += 1;
            if iterations % FPS_LOG_EVERY_N_ITERATIONS == 0 {
                let metrics = self.fps_tracker.calculate_fps_metrics();
                info!(
                    target_fps = metrics.target_fps,
                    actual_fps = metrics.actual_fps,
                    "inference call rate"
                );
            }
        }

        debug!("inference loop exiting");
        Ok(())
    }

    async fn run_one_iteration(&self, threshold: usize) -> Result<(), AppError> {
        let step_start = Instant::now();

        // Step 2: atomic snapshot of (i_before, tail).
        let (i_before, tail) = self.queue.snapshot_for_inference();

        // Step 3: estimated delay from the bounded recent-latency history.
        let d_est = LatencyTracker::to_ticks(self.latency_tracker.max(), self.config.fps);

        // Step 4-5: observe, post-process, batch, pre-process.
        let obs = {
            let mut robot = self.robot.lock().await;
            robot.get_observation().await?
        };
        let obs = self.obs_post.process(obs);
        let obs_tensor = observation_to_policy_input(&obs, &self.config.task, &self.config.robot_type);
        let obs_tensor = self.policy_pre.process(&obs_tensor);

        // Step 6: the policy's internal denoise loop applies §4.2 with
        // `tail` as `p`; inference_delay compensates for this call's own
        // expected duration.
        let prev_tail_tensor = tail_to_tensor(&tail);
        let raw_chunk_tensor = self
            .policy
            .predict_action_chunk(&obs_tensor, d_est, prev_tail_tensor.as_ref())
            .await?;

        // Step 7-8: capture raw before post-processing, then post-process.
        let raw = tensor_to_chunk(&raw_chunk_tensor);
        let post_tensor = self.policy_post.process(&raw_chunk_tensor);
        let post = tensor_to_chunk(&post_tensor);

        // Step 9: measured latency drives the actual merge compensation.
        let actual_latency = step_start.elapsed().as_secs_f64();
        let d_actual = LatencyTracker::to_ticks(actual_latency, self.config.fps);
        self.latency_tracker.add(actual_latency.max(f64::MIN_POSITIVE));

        // Step 10: soft warning, not an error (§7 Soft Warnings).
        if self.config.rtc.enabled
            && (threshold as u64) < self.config.rtc.execution_horizon as u64 + d_actual
        {
            warn!(
                threshold,
                execution_horizon = self.config.rtc.execution_horizon,
                d_actual,
                "threshold below execution_horizon + measured delay; queue may underflow"
            );
        }

        // Step 11.
        self.queue.merge(raw, post, d_actual, i_before);

        Ok(())
    }
}

fn observation_to_policy_input(
    obs: &std::collections::HashMap<String, Tensor>,
    task: &str,
    robot_type: &str,
) -> Tensor {
    // Concrete batching (image scaling, channel-first conversion, leading
    // batch dim, `task`/`robot_type` attachment) is policy-family specific;
    // this crate exposes the hook point (§4.6 step 4) rather than a fixed
    // encoding. A minimal, order-independent stand-in concatenates whatever
    // numeric tensors are present along a new leading batch dimension.
    let _ = (task, robot_type);
    let mut keys: Vec<&String> = obs.keys().collect();
    keys.sort();
    if keys.is_empty() {
        return Tensor::zeros([1, 0], (tch::Kind::Float, tch::Device::Cpu));
    }
    let parts: Vec<Tensor> = keys
        .into_iter()
        .map(|k| obs[k].shallow_clone().unsqueeze(0))
        .collect();
    Tensor::cat(&parts, 1)
}

fn tail_to_tensor(tail: &[Action]) -> Option<Tensor> {
    if tail.is_empty() {
        return None;
    }
    let rows: Vec<Tensor> = tail
        .iter()
        .map(|a| Tensor::from_slice(&a.0).unsqueeze(0))
        .collect();
    Some(Tensor::cat(&rows, 0))
}

fn tensor_to_chunk(t: &Tensor) -> Chunk {
    let t = if t.dim() == 3 { t.squeeze_dim(0) } else { t.shallow_clone() };
    let chunk_len = t.size()[0];
    let actions = (0..chunk_len)
        .map(|i| {
            let row = t.get(i);
            let dim = row.size()[0] as usize;
            let mut values = vec![0.0f32; dim];
            row.to_kind(tch::Kind::Float)
                .copy_data(&mut values, dim);
            Action::new(values)
        })
        .collect();
    Chunk::new(actions)
}
