//! In-process event bus.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::domain::{CommitEvent, PublishError, Publisher, Subscriber};

/// Broadcast channel of commit events.
///
/// Receivers that fall more than `capacity` events behind skip ahead and are
/// told to resync.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CommitEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommitEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Publisher for EventBus {
    async fn publish(&self, event: CommitEvent) -> Result<(), PublishError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers)
    }
}

/// Forward every bus event to `subscriber` until the bus closes.
pub fn spawn_dispatcher(bus: &EventBus, subscriber: Arc<dyn Subscriber>) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => subscriber.on_commit(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event dispatcher lagged; resyncing subscriptions");
                    subscriber.on_overflow();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Event dispatcher stopped");
    })
}
