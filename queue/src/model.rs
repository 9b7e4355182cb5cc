/// Monotonically non-decreasing counter of actions ever popped (or destined
/// to be popped) by the actuator (§3).
pub type ActionIndex = u64;

/// A single control-step command: `action_dim` real-valued motor commands.
/// Dimension ordering is fixed per robot and carried outside this crate as an
/// ordered list of feature names (§3, §6).
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Action(pub Vec<f32>);

impl Action {
    pub fn new(values: impl Into<Vec<f32>>) -> Self {
        Self(values.into())
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }
}

/// An ordered sequence of actions representing consecutive future control
/// steps: shape `(chunk_size, action_dim)` (§3). `Chunk` does not encode
/// which "form" (raw/postprocessed) it holds — callers track that via which
/// field of [`crate::ActionQueue::merge`] they pass it as.
#[derive(Clone, Debug, Default)]
pub struct Chunk(pub Vec<Action>);

impl Chunk {
    pub fn new(actions: impl Into<Vec<Action>>) -> Self {
        Self(actions.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.0.iter()
    }
}

/// `(index, postprocessed action, raw action)` held by the queue (§3).
#[derive(Clone, Debug)]
pub(crate) struct QueueEntry {
    pub index: ActionIndex,
    pub postprocessed: Action,
    pub raw: Action,
}
