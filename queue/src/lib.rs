mod model;
mod queue;

pub use model::{Action, ActionIndex, Chunk};
pub use queue::ActionQueue;
