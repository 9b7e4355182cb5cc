//! Actuator Loop (§4.5): the fixed-rate consumer. Pops one action per tick
//! and dispatches it; never blocks on an empty queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::AppError;
use latency::FpsTracker;
use queue::ActionQueue;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, instrument, warn};

use crate::robot::{to_named_action, Robot, RobotActionPostProcessor};
use crate::shutdown::Shutdown;

/// Scheduler jitter compensation subtracted from each tick's sleep (§4.5
/// step 4).
const EPSILON: Duration = Duration::from_millis(1);

/// How often the rolling FPS metrics are logged (SPEC_FULL §C.1).
const FPS_LOG_EVERY_N_TICKS: u64 = 150;

pub struct ActuatorLoop<R: Robot> {
    queue: Arc<ActionQueue>,
    robot: Arc<AsyncMutex<R>>,
    post: Arc<dyn RobotActionPostProcessor>,
    tick_period: Duration,
    shutdown: Shutdown,
    fps_tracker: FpsTracker,
}

impl<R: Robot> ActuatorLoop<R> {
    pub fn new(
        queue: Arc<ActionQueue>,
        robot: Arc<AsyncMutex<R>>,
        post: Arc<dyn RobotActionPostProcessor>,
        tick_period: Duration,
        shutdown: Shutdown,
    ) -> Self {
        let target_fps = 1.0 / tick_period.as_secs_f64();
        Self {
            queue,
            robot,
            post,
            tick_period,
            shutdown,
            fps_tracker: FpsTracker::new(target_fps),
        }
    }

    /// Drives the robot at exactly `1 / tick_period` Hz until shutdown is
    /// requested or `robot.send_action` fails (§4.5 Failure — fatal). A
    /// drain request (§C.5) keeps ticking until the queue is empty before
    /// honoring the stop.
    #[instrument(skip(self), target = "actuator")]
    pub async fn run(self) -> Result<(), AppError> {
        debug!("actuator loop starting");
        let mut ticks: u64 = 0;

        loop {
            if self.shutdown.is_requested() {
                if !(self.shutdown.is_draining() && self.queue.size() > 0) {
                    break;
                }
            }

            let t0 = Instant::now();
            self.fps_tracker.tick(t0);

            if let Err(e) = self.dispatch_one_tick().await {
                error!(error = ?e, "send_action failed; actuator shutting down");
                self.shutdown.request();
                return Err(e);
            }

            ticks += 1;
            if ticks % FPS_LOG_EVERY_N_TICKS == 0 {
                let metrics = self.fps_tracker.calculate_fps_metrics();
                info!(target_fps = metrics.target_fps, actual_fps = metrics.actual_fps, "actuator fps");
            }

            let elapsed = t0.elapsed();
            let sleep_for = self
                .tick_period
                .saturating_sub(elapsed)
                .saturating_sub(EPSILON);

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.shutdown.notified() => {
                    if !(self.shutdown.is_draining() && self.queue.size() > 0) {
                        break;
                    }
                }
            }
        }

        debug!("actuator loop exiting");
        Ok(())
    }

    async fn dispatch_one_tick(&self) -> Result<(), AppError> {
        let Some(action) = self.queue.pop() else {
            return Ok(());
        };

        let mut robot = self.robot.lock().await;
        let named = to_named_action(&action.0, robot.action_features());
        let named = self.post.process(&named);
        robot.send_action(&named).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use queue::{Action, Chunk};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tch::Tensor;

    struct IdentityPost;
    impl RobotActionPostProcessor for IdentityPost {
        fn process(&self, action: &HashMap<String, f32>) -> HashMap<String, f32> {
            action.clone()
        }
    }

    struct StubRobot {
        features: Vec<String>,
        sent: Arc<StdMutex<Vec<HashMap<String, f32>>>>,
        fail: bool,
    }

    #[async_trait]
    impl Robot for StubRobot {
        fn name(&self) -> &str {
            "stub"
        }
        fn observation_features(&self) -> &[String] {
            &[]
        }
        fn action_features(&self) -> &[String] {
            &self.features
        }
        async fn connect(&mut self) -> Result<(), AppError> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<(), AppError> {
            Ok(())
        }
        async fn get_observation(&mut self) -> Result<HashMap<String, Tensor>, AppError> {
            Ok(HashMap::new())
        }
        async fn send_action(
            &mut self,
            action: &HashMap<String, f32>,
        ) -> Result<Option<HashMap<String, f32>>, AppError> {
            if self.fail {
                return Err(AppError::RobotIo("simulated failure".into()));
            }
            self.sent.lock().unwrap().push(action.clone());
            Ok(None)
        }
    }

    #[tokio::test]
    async fn empty_queue_skips_dispatch_without_blocking() {
        let queue = Arc::new(ActionQueue::new());
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let robot = Arc::new(AsyncMutex::new(StubRobot {
            features: vec!["a".into()],
            sent: sent.clone(),
            fail: false,
        }));

        let actuator = ActuatorLoop::new(
            queue,
            robot,
            Arc::new(IdentityPost),
            Duration::from_millis(10),
            Shutdown::new(),
        );

        actuator.dispatch_one_tick().await.unwrap();
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn popped_action_is_converted_and_sent() {
        let queue = Arc::new(ActionQueue::new());
        queue.merge(
            Chunk::new(vec![Action::new(vec![1.0, 2.0])]),
            Chunk::new(vec![Action::new(vec![1.0, 2.0])]),
            0,
            0,
        );

        let sent = Arc::new(StdMutex::new(Vec::new()));
        let robot = Arc::new(AsyncMutex::new(StubRobot {
            features: vec!["shoulder".into(), "elbow".into()],
            sent: sent.clone(),
            fail: false,
        }));

        let actuator = ActuatorLoop::new(
            queue,
            robot,
            Arc::new(IdentityPost),
            Duration::from_millis(10),
            Shutdown::new(),
        );

        actuator.dispatch_one_tick().await.unwrap();
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get("shoulder"), Some(&1.0));
        assert_eq!(sent[0].get("elbow"), Some(&2.0));
    }

    #[tokio::test]
    async fn send_failure_requests_shutdown() {
        let queue = Arc::new(ActionQueue::new());
        queue.merge(
            Chunk::new(vec![Action::new(vec![1.0])]),
            Chunk::new(vec![Action::new(vec![1.0])]),
            0,
            0,
        );

        let robot = Arc::new(AsyncMutex::new(StubRobot {
            features: vec!["a".into()],
            sent: Arc::new(StdMutex::new(Vec::new())),
            fail: true,
        }));

        let shutdown = Shutdown::new();
        let actuator = ActuatorLoop::new(
            queue,
            robot,
            Arc::new(IdentityPost),
            Duration::from_millis(10),
            shutdown.clone(),
        );

        let err = actuator.run().await;
        assert!(err.is_err());
        assert!(shutdown.is_requested());
    }

    #[tokio::test]
    async fn dispatch_counts_are_driven_once_per_tick() {
        let queue = Arc::new(ActionQueue::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        queue.merge(
            Chunk::new((0..3).map(|i| Action::new(vec![i as f32])).collect()),
            Chunk::new((0..3).map(|i| Action::new(vec![i as f32])).collect()),
            0,
            0,
        );

        for _ in 0..3 {
            let popped = queue.pop();
            if popped.is_some() {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.pop(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_request_empties_queue_before_stopping() {
        let queue = Arc::new(ActionQueue::new());
        queue.merge(
            Chunk::new((0..3).map(|i| Action::new(vec![i as f32])).collect()),
            Chunk::new((0..3).map(|i| Action::new(vec![i as f32])).collect()),
            0,
            0,
        );

        let sent = Arc::new(StdMutex::new(Vec::new()));
        let robot = Arc::new(AsyncMutex::new(StubRobot {
            features: vec!["a".into()],
            sent: sent.clone(),
            fail: false,
        }));

        let shutdown = Shutdown::new();
        shutdown.request_drain();

        let actuator = ActuatorLoop::new(
            queue.clone(),
            robot,
            Arc::new(IdentityPost),
            Duration::from_millis(1),
            shutdown,
        );

        actuator.run().await.unwrap();
        assert_eq!(sent.lock().unwrap().len(), 3);
        assert_eq!(queue.size(), 0);
    }
}
