//! Robot-side client buffer (§4.7): merges incoming `TimedAction` chunks
//! keyed by absolute timestep, tracks the `must_go` flag, and throttles
//! outbound observations per §5 Backpressure.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::wire::TimedAction;

/// How two candidate actions for the same timestep are reconciled when a
/// later chunk overlaps an earlier one (§4.7). Default: replace with the
/// newer chunk's value.
pub trait AggregateFn: Send + Sync {
    fn aggregate(&self, existing: &TimedAction, incoming: &TimedAction) -> TimedAction;
}

pub struct ReplaceWithNewest;
impl AggregateFn for ReplaceWithNewest {
    fn aggregate(&self, _existing: &TimedAction, incoming: &TimedAction) -> TimedAction {
        incoming.clone()
    }
}

struct BufferState {
    actions: BTreeMap<i64, TimedAction>,
    latest_executed: Option<i64>,
}

/// Merges action chunks from the server into a single timestep-ordered
/// buffer the actuator loop drains from (§4.7, analogous to
/// [`queue::ActionQueue::merge`] on the local-inference path).
pub struct ClientActionBuffer {
    state: Mutex<BufferState>,
    aggregate: Box<dyn AggregateFn>,
}

impl ClientActionBuffer {
    pub fn new(aggregate: Box<dyn AggregateFn>) -> Self {
        Self {
            state: Mutex::new(BufferState {
                actions: BTreeMap::new(),
                latest_executed: None,
            }),
            aggregate,
        }
    }

    /// Folds an incoming chunk into the buffer. An action whose timestep
    /// is at or before the last executed one is dropped as stale; a new
    /// timestep is inserted; an overlapping one is reconciled via the
    /// aggregate function.
    pub fn merge_chunk(&self, chunk: Vec<TimedAction>) {
        let mut state = self.state.lock();
        let latest_executed = state.latest_executed;
        for action in chunk {
            if let Some(executed) = latest_executed {
                if action.timestep <= executed {
                    continue;
                }
            }
            match state.actions.get(&action.timestep) {
                Some(existing) => {
                    let merged = self.aggregate.aggregate(existing, &action);
                    state.actions.insert(action.timestep, merged);
                }
                None => {
                    state.actions.insert(action.timestep, action);
                }
            }
        }
    }

    /// Pops the earliest-timestep action for dispatch, recording it as
    /// the new `latest_executed` watermark.
    pub fn pop_next(&self) -> Option<TimedAction> {
        let mut state = self.state.lock();
        let key = *state.actions.keys().next()?;
        let action = state.actions.remove(&key).unwrap();
        state.latest_executed = Some(key);
        Some(action)
    }

    pub fn len(&self) -> usize {
        self.state.lock().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tracks whether the next outbound observation must bypass the server's
/// similarity filter (§4.7 "must_go"): set whenever a new chunk arrives,
/// cleared once an observation has been sent while the buffer is empty.
pub struct MustGoFlag {
    flag: Mutex<bool>,
}

impl MustGoFlag {
    pub fn new() -> Self {
        Self {
            flag: Mutex::new(true),
        }
    }

    pub fn mark_chunk_received(&self) {
        *self.flag.lock() = true;
    }

    /// Consumes the flag: returns its current value and clears it.
    pub fn take(&self) -> bool {
        let mut guard = self.flag.lock();
        let v = *guard;
        *guard = false;
        v
    }
}

impl Default for MustGoFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// §5 Backpressure: only send a fresh observation once the buffer has
/// drained below `chunk_size_threshold`, mirroring the local-inference
/// trigger in [`runtime::config::RuntimeConfig::threshold`].
pub fn should_send_observation(buffer: &ClientActionBuffer, chunk_size_threshold: usize) -> bool {
    buffer.len() < chunk_size_threshold
}
