//! Client-session task rendezvous (SPEC_FULL §C.2a): the receiver task
//! (which pulls action chunks off the wire) and the control-loop task
//! (which drains [`crate::client::ClientActionBuffer`] onto the robot)
//! must not start ticking until both are ready, or the receiver can
//! mutate the buffer before the control loop has taken its first
//! measurement. Mirrors the reference client's `threading.Barrier(2)`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;
use tracing::debug;

/// Two-party rendezvous point shared between the receiver and
/// control-loop tasks of one client session.
#[derive(Clone)]
pub struct StartBarrier {
    barrier: Arc<Barrier>,
}

impl StartBarrier {
    pub fn new() -> Self {
        Self {
            barrier: Arc::new(Barrier::new(2)),
        }
    }

    /// Blocks until both parties have called `wait()`.
    pub async fn wait(&self) {
        debug!("waiting at client session start barrier");
        self.barrier.wait().await;
    }
}

impl Default for StartBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn both_parties_unblock_only_after_both_arrive() {
        let barrier = StartBarrier::new();
        let b2 = barrier.clone();

        let control = tokio::spawn(async move {
            barrier.wait().await;
            "control ready"
        });

        // The receiver sleeps before arriving; if the barrier were a
        // no-op, `control` would already have completed by now.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!control.is_finished());

        b2.wait().await;
        let result = tokio::time::timeout(Duration::from_millis(100), control)
            .await
            .expect("control task must unblock once both parties arrive")
            .unwrap();
        assert_eq!(result, "control ready");
    }
}
