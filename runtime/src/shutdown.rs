//! A shared, cooperative shutdown flag (§5 Cancellation): polled at loop
//! heads and between suspension points. No loop is ever force-killed; each
//! notices the flag at its own next checkpoint and unwinds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            draining: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sets the flag and wakes any loop parked in [`Shutdown::notified`].
    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// A softer variant of [`Shutdown::request`] (SPEC_FULL §C.5): asks
    /// the actuator loop to keep dispatching until the queue drains
    /// instead of stopping on its next tick.
    pub fn request_drain(&self) {
        self.draining.store(true, Ordering::Release);
        self.request();
    }

    /// Whether shutdown was requested via [`Shutdown::request_drain`]
    /// rather than a hard [`Shutdown::request`].
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Resolves once `request()` has been called, for use in `tokio::select!`
    /// alongside a loop's normal suspension points.
    pub async fn notified(&self) {
        if self.is_requested() {
            return;
        }
        self.notify.notified().await;
    }
}
