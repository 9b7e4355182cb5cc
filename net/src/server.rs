//! Policy Server (§4.7): hosts the policy, enforces per-timestep
//! deduplication, and answers `GetActions` from a capacity-1 inbound
//! observation queue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::AppError;
use parking_lot::Mutex;
use runtime::{Policy, PolicyPostProcessor, PolicyPreProcessor};
use tch::Tensor;
use tokio::sync::Notify;
use tracing::{debug, instrument, warn};

use crate::wire::{RemotePolicyConfig, TimedAction, TimedObservation};

/// Similarity test over observation feature channels (§4.7 "too similar"
/// — implementation-defined; this is an L2 threshold on the concatenated
/// numeric channels).
pub trait ObservationSimilarity: Send + Sync {
    fn too_similar(&self, a: &TimedObservation, b: &TimedObservation) -> bool;
}

pub struct L2Similarity {
    pub threshold: f32,
}

impl ObservationSimilarity for L2Similarity {
    fn too_similar(&self, a: &TimedObservation, b: &TimedObservation) -> bool {
        let mut sum_sq = 0.0f32;
        for (name, va) in &a.features {
            let Some((_, vb)) = b.features.iter().find(|(n, _)| n == name) else {
                continue;
            };
            for (x, y) in va.iter().zip(vb.iter()) {
                let d = x - y;
                sum_sq += d * d;
            }
        }
        sum_sq.sqrt() < self.threshold
    }
}

struct InboundSlot {
    current: Option<TimedObservation>,
}

/// Capacity-1 inbound observation queue: a new arrival replaces whatever
/// is currently held (§4.7 Observation channel).
struct InboundQueue {
    slot: Mutex<InboundSlot>,
    notify: Notify,
}

impl InboundQueue {
    fn new() -> Self {
        Self {
            slot: Mutex::new(InboundSlot { current: None }),
            notify: Notify::new(),
        }
    }

    fn push(&self, obs: TimedObservation) {
        self.slot.lock().current = Some(obs);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<TimedObservation> {
        self.slot.lock().current.take()
    }

    async fn pop_timeout(&self, timeout: Duration) -> Option<TimedObservation> {
        if let Some(o) = self.try_pop() {
            return Some(o);
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        self.try_pop()
    }

    fn reset(&self) {
        self.slot.lock().current = None;
    }
}

pub struct PolicyServer {
    policy: Arc<dyn Policy>,
    pre: Arc<dyn PolicyPreProcessor>,
    post: Arc<dyn PolicyPostProcessor>,
    similarity: Arc<dyn ObservationSimilarity>,
    fps: f64,
    obs_queue_timeout: Duration,

    inbound: InboundQueue,
    predicted: Mutex<HashSet<i64>>,
    last_accepted: Mutex<Option<TimedObservation>>,
}

impl PolicyServer {
    pub fn new(
        policy: Arc<dyn Policy>,
        pre: Arc<dyn PolicyPreProcessor>,
        post: Arc<dyn PolicyPostProcessor>,
        similarity: Arc<dyn ObservationSimilarity>,
        fps: f64,
        obs_queue_timeout: Duration,
    ) -> Self {
        Self {
            policy,
            pre,
            post,
            similarity,
            fps,
            obs_queue_timeout,
            inbound: InboundQueue::new(),
            predicted: Mutex::new(HashSet::new()),
            last_accepted: Mutex::new(None),
        }
    }

    /// `Ready()` (§4.7 Handshake): resets all session state.
    pub fn ready(&self) {
        self.inbound.reset();
        self.predicted.lock().clear();
        *self.last_accepted.lock() = None;
    }

    /// `SendPolicyInstructions` (§4.7 Handshake). Concrete policy loading
    /// is out of scope (§1 Non-goals); this validates the handshake shape.
    pub fn send_policy_instructions(&self, cfg: &RemotePolicyConfig) -> Result<(), AppError> {
        if cfg.action_features.is_empty() {
            return Err(AppError::ConfigInvalid(
                "RemotePolicyConfig.action_features must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Accepts or drops an incoming observation per §4.7's three-way rule.
    /// Returns whether it was accepted.
    #[instrument(skip(self, obs), target = "net::server", fields(timestep = obs.timestep, must_go = obs.must_go))]
    pub fn offer_observation(&self, obs: TimedObservation) -> bool {
        let already_predicted = self.predicted.lock().contains(&obs.timestep);
        let last = self.last_accepted.lock().clone();

        let accept = obs.must_go
            || last.is_none()
            || (!already_predicted && !self.similarity.too_similar(&obs, last.as_ref().unwrap()));

        if accept {
            *self.last_accepted.lock() = Some(obs.clone());
            self.inbound.push(obs);
        } else {
            debug!("observation dropped by dedup/similarity filter");
        }
        accept
    }

    /// `GetActions()` (§4.7 Action channel): pops the inbound queue
    /// (timeout-bounded; empty -> empty reply), marks the timestep
    /// predicted, runs predict -> postprocess, and stamps the chunk.
    #[instrument(skip(self), target = "net::server")]
    pub async fn get_actions(&self) -> Result<Vec<TimedAction>, AppError> {
        let Some(obs) = self.inbound.pop_timeout(self.obs_queue_timeout).await else {
            return Ok(Vec::new());
        };

        // P9: a timestep is never predicted twice.
        let first_time = self.predicted.lock().insert(obs.timestep);
        if !first_time {
            warn!(timestep = obs.timestep, "timestep already predicted; skipping");
            return Ok(Vec::new());
        }

        let obs_tensor = features_to_tensor(&obs.features);
        let pre = self.pre.process(&obs_tensor);
        let raw = self.policy.predict_action_chunk(&pre, 0, None).await?;
        let post = self.post.process(&raw);

        Ok(stamp_chunk(&post, obs.timestamp, obs.timestep, self.fps))
    }

    pub fn has_predicted(&self, timestep: i64) -> bool {
        self.predicted.lock().contains(&timestep)
    }
}

fn features_to_tensor(features: &[(String, Vec<f32>)]) -> Tensor {
    let mut sorted = features.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let flat: Vec<f32> = sorted.into_iter().flat_map(|(_, v)| v).collect();
    Tensor::from_slice(&flat).unsqueeze(0)
}

/// Stamps each row of a `(1, chunk_size, action_dim)` or `(chunk_size,
/// action_dim)` tensor with `(timestamp = obs_timestamp + i/fps, timestep =
/// obs_timestep + i)` (§4.7 Action channel, §8-S5).
fn stamp_chunk(chunk: &Tensor, obs_timestamp: f64, obs_timestep: i64, fps: f64) -> Vec<TimedAction> {
    let chunk = if chunk.dim() == 3 { chunk.squeeze_dim(0) } else { chunk.shallow_clone() };
    let len = chunk.size()[0];
    (0..len)
        .map(|i| {
            let row = chunk.get(i);
            let dim = row.size()[0] as usize;
            let mut values = vec![0.0f32; dim];
            row.to_kind(tch::Kind::Float).copy_data(&mut values, dim);
            TimedAction {
                action: values,
                timestamp: obs_timestamp + i as f64 / fps,
                timestep: obs_timestep + i,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubPolicy;

    #[async_trait]
    impl Policy for StubPolicy {
        async fn predict_action_chunk(
            &self,
            _obs: &Tensor,
            _inference_delay: u64,
            _prev_chunk_left_over: Option<&Tensor>,
        ) -> Result<Tensor, AppError> {
            Ok(Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0]).view([2, 2]))
        }
    }

    struct Identity;
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

    struct NeverSimilar;
    impl ObservationSimilarity for NeverSimilar {
        fn too_similar(&self, _a: &TimedObservation, _b: &TimedObservation) -> bool {
            false
        }
    }

    struct AlwaysSimilar;
    impl ObservationSimilarity for AlwaysSimilar {
        fn too_similar(&self, _a: &TimedObservation, _b: &TimedObservation) -> bool {
            true
        }
    }

    fn obs(timestep: i64, must_go: bool) -> TimedObservation {
        TimedObservation {
            features: vec![("j0".to_string(), vec![1.0])],
            timestamp: timestep as f64 * 0.1,
            timestep,
            must_go,
        }
    }

    fn server(similarity: impl ObservationSimilarity + 'static) -> PolicyServer {
        PolicyServer::new(
            Arc::new(StubPolicy),
            Arc::new(Identity),
            Arc::new(Identity),
            Arc::new(similarity),
            30.0,
            Duration::from_millis(50),
        )
    }

    #[test]
    fn first_observation_is_always_accepted() {
        let s = server(AlwaysSimilar);
        assert!(s.offer_observation(obs(1, false)));
    }

    /// P10: must_go bypasses a similarity filter that would reject
    /// everything.
    #[test]
    fn p10_must_go_bypasses_similarity_filter() {
        let s = server(AlwaysSimilar);
        assert!(s.offer_observation(obs(1, false)));
        assert!(!s.offer_observation(obs(2, false)), "similar obs should be dropped");
        assert!(s.offer_observation(obs(3, true)), "must_go must force acceptance");
    }

    #[tokio::test]
    async fn p9_get_actions_never_predicts_same_timestep_twice() {
        let s = server(NeverSimilar);
        s.offer_observation(obs(5, true));
        let first = s.get_actions().await.unwrap();
        assert!(!first.is_empty());

        // Re-offering the same timestep without must_go, with a
        // similarity filter that would otherwise accept, is blocked by
        // the "never predicted" clause once it has been predicted.
        assert!(s.has_predicted(5));
        let accepted_again = s.offer_observation(obs(5, false));
        assert!(!accepted_again, "an already-predicted timestep must not be re-accepted");
    }

    #[tokio::test]
    async fn get_actions_on_empty_queue_returns_empty() {
        let s = server(NeverSimilar);
        let actions = s.get_actions().await.unwrap();
        assert!(actions.is_empty());
    }

    #[tokio::test]
    async fn stamped_chunk_matches_s5_sequence() {
        let s = server(NeverSimilar);
        s.offer_observation(TimedObservation {
            features: vec![("j0".to_string(), vec![1.0])],
            timestamp: 0.1,
            timestep: 10,
            must_go: true,
        });
        let actions = s.get_actions().await.unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].timestep, 10);
        assert!((actions[0].timestamp - 0.1).abs() < 1e-9);
    }

    #[test]
    fn ready_clears_session_state() {
        let s = server(NeverSimilar);
        s.offer_observation(obs(1, true));
        s.ready();
        assert!(!s.has_predicted(1));
    }
}
