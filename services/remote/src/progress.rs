//! Progress reporting shared by the packaging and upload tools.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

/// Non-blocking producer side of a bounded progress channel.
///
/// Events are dropped when the consumer falls behind; a closed channel is
/// ignored.
#[derive(Debug, Clone)]
pub struct ProgressSender<T> {
    tx: Option<mpsc::Sender<T>>,
}

impl<T> ProgressSender<T> {
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sender that discards every event
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: T) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("Progress consumer lagging, event dropped"),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
