//! Stop notification for background tasks the orchestrator owns.
//!
//! The stop is latched: a task that looks after the trigger (for example
//! once a long maintenance run returns) still sees it.

use tokio::sync::watch;

/// Held by the orchestrator. Triggering it, or dropping it, stops every
/// [`ShutdownListener`].
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Held by a background task.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownListener {
    /// Whether the stop has been triggered or its owner is gone.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once [`Shutdown::trigger`] ran or the [`Shutdown`] was dropped.
    pub async fn triggered(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}
