//! The broker contract shared by every pub/sub implementation.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use searchcast_core::StatusEvent;

use crate::memory::MemoryBroker;
use crate::redis_broker::RedisBroker;

/// Name of the single topic carrying every search-status event.
pub const STATUS_CHANNEL: &str = "search-status";

/// A live subscription to [`STATUS_CHANNEL`].
///
/// Yields raw payloads in broker delivery order. An `Err` item or the end
/// of the stream means the subscription is gone and must be re-established.
pub type BrokerSubscription = Pin<Box<dyn Stream<Item = Result<String, BrokerError>> + Send>>;

/// Publish/subscribe access to the status channel.
///
/// Delivery is at-most-once: messages published while no subscription is
/// active, or lost with a broker connection, are never redelivered.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a new subscription to the status channel.
    async fn subscribe(&self) -> Result<BrokerSubscription, BrokerError>;

    /// Publish an already-encoded payload to the status channel.
    async fn publish_raw(&self, payload: &str) -> Result<(), BrokerError>;

    /// Check that the broker is reachable.
    async fn ping(&self) -> Result<(), BrokerError>;

    /// Encode and publish one status transition.
    async fn publish(&self, event: &StatusEvent) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(event)?;
        self.publish_raw(&payload).await
    }
}

/// Errors raised by broker implementations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// An established subscription failed.
    #[error("Broker subscription failed: {0}")]
    Subscription(String),

    /// A publish call was rejected or the connection dropped.
    #[error("Broker publish failed: {0}")]
    Publish(String),

    /// The event could not be serialized.
    #[error("Failed to encode status event: {0}")]
    Encode(#[from] serde_json::Error),

    /// The broker URL uses a scheme no implementation handles.
    #[error("Unsupported broker URL: {0}")]
    UnsupportedUrl(String),
}

/// Connect to the broker named by `url`.
///
/// * `redis://` / `rediss://` - [`RedisBroker`]
/// * `memory://` - a fresh [`MemoryBroker`] local to this process
pub async fn connect(url: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        let broker = RedisBroker::connect(url).await?;
        Ok(Arc::new(broker))
    } else if url.starts_with("memory://") {
        tracing::warn!("Using in-process memory broker; events from other processes will not arrive");
        Ok(Arc::new(MemoryBroker::default()))
    } else {
        Err(BrokerError::UnsupportedUrl(url.to_string()))
    }
}
