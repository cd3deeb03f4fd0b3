//! Process lifecycle hook used by the shutdown command.

use tokio::sync::watch;
use tracing::info;

/// Collaborator that terminates the broker process.
pub trait ProcessLifecycle: Send + Sync {
    /// Begin process shutdown
    fn shutdown(&self);
}

/// [`ProcessLifecycle`] that broadcasts the shutdown request to subscribers.
///
/// The server loop holds a receiver and stops accepting connections once
/// the value flips to `true`.
///
/// # Examples
///
/// ```rust
/// use queue_session::lifecycle::{ProcessLifecycle, ShutdownNotifier};
///
/// # tokio_test::block_on(async {
/// let notifier = ShutdownNotifier::new();
/// let mut receiver = notifier.subscribe();
///
/// notifier.shutdown();
///
/// receiver.changed().await.unwrap();
/// assert!(*receiver.borrow());
/// # });
/// ```
#[derive(Debug)]
pub struct ShutdownNotifier {
    sender: watch::Sender<bool>,
}

impl ShutdownNotifier {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once shutdown has been requested
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|requested| *requested).await;
    }
}

impl Default for ShutdownNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLifecycle for ShutdownNotifier {
    fn shutdown(&self) {
        info!("Shutdown requested");
        self.sender.send_replace(true);
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
