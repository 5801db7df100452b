//! Shutdown notification channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Broadcast shutdown notifier.
///
/// Notifications are sticky: a listener subscribed after `shutdown` was
/// called still sees it.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    fired: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal manager.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> ShutdownListener {
        // Subscribe before reading the flag so a concurrent `shutdown` is
        // seen by one or the other.
        let receiver = self.sender.subscribe();
        ShutdownListener {
            receiver,
            fired: Arc::clone(&self.fired),
        }
    }

    /// Trigger shutdown. Repeat calls are harmless.
    pub fn shutdown(&self) {
        self.fired.store(true, Ordering::Release);
        let _ = self.sender.send(());
    }

    /// Whether `shutdown` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`ShutdownSignal`].
#[derive(Debug)]
pub struct ShutdownListener {
    receiver: broadcast::Receiver<()>,
    fired: Arc<AtomicBool>,
}

impl ShutdownListener {
    /// Wait for shutdown.
    ///
    /// Also resolves if every [`ShutdownSignal`] has been dropped, since no
    /// notification can arrive after that.
    pub async fn recv(&mut self) {
        if self.fired.load(Ordering::Acquire) {
            return;
        }
        // Ok, Lagged and Closed all mean the same thing here.
        let _ = self.receiver.recv().await;
    }
}
