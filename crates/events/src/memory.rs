//! In-process broker backed by a `tokio::sync::broadcast` channel.
//!
//! [`MemoryBroker`] behaves like a single-topic pub/sub server living inside
//! the current process: every subscription independently receives every
//! payload published after it was opened.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::broker::{Broker, BrokerError, BrokerSubscription};

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum MemoryMessage {
    Payload(String),
    /// Simulated link failure; every subscriber's stream yields an error.
    Fault(String),
}

/// Single-process broker.
///
/// When the buffer is full, the oldest un-consumed messages are dropped and
/// a slow subscription silently loses them, which matches the at-most-once
/// contract of a real broker.
pub struct MemoryBroker {
    sender: broadcast::Sender<MemoryMessage>,
}

impl MemoryBroker {
    /// Create a broker with a specific channel capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Fail every currently open subscription.
    ///
    /// Subscriptions opened afterwards are unaffected.
    pub fn inject_fault(&self, reason: impl Into<String>) {
        let _ = self.sender.send(MemoryMessage::Fault(reason.into()));
    }

    /// Number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(&self) -> Result<BrokerSubscription, BrokerError> {
        let receiver = self.sender.subscribe();

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(MemoryMessage::Payload(payload)) => return Some((Ok(payload), receiver)),
                    Ok(MemoryMessage::Fault(reason)) => {
                        return Some((Err(BrokerError::Subscription(reason)), receiver));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Memory broker subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn publish_raw(&self, payload: &str) -> Result<(), BrokerError> {
        // A SendError only means there are zero subscriptions.
        let _ = self.sender.send(MemoryMessage::Payload(payload.to_string()));
        Ok(())
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}
