use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::notification::{RequestEvent, RequestUpdate};

/// Push channel for request events. Fire-and-forget from the engine's side.
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, event: RequestEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification channel failed: {0}")]
    Channel(String),
}

/// Deliver a status update, logging instead of propagating failures.
pub async fn publish_update(notifier: &dyn StatusNotifier, update: RequestUpdate) {
    let id = update.id;
    let status = update.status;
    match notifier.notify(RequestEvent::RequestUpdated(update)).await {
        Ok(()) => debug!(request_id = id, %status, "Broadcast request update"),
        Err(e) => warn!(request_id = id, %status, error = %e, "Failed to broadcast request update"),
    }
}

/// In-process fan-out to every subscriber (WebSocket clients).
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<RequestEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RequestEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl StatusNotifier for BroadcastNotifier {
    async fn notify(&self, event: RequestEvent) -> Result<(), NotifyError> {
        // No subscribers is not a failure: nobody is listening right now.
        match self.sender.send(event) {
            Ok(receivers) => debug!(receivers, "Event delivered to subscribers"),
            Err(_) => debug!("No subscribers for event"),
        }
        Ok(())
    }
}
