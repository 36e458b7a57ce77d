//! Broker-to-client fan-out.
//!
//! [`Bridge`] owns the single broker subscription of this process. A
//! dedicated receive loop pulls each payload off the status channel, decodes
//! it, and queues it on every open client stream. Client streams are
//! registered with [`Bridge::accept`] and released with [`Bridge::stop`] or
//! by dropping their [`SubscriptionHandle`].
//!
//! Every open stream receives every event; there is no per-requester
//! scoping at this layer.

mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use searchcast_core::backoff::{next_delay, ReconnectConfig};
use searchcast_core::types::Timestamp;
use searchcast_core::{parse_status_event, StatusEvent};
use searchcast_events::{Broker, BrokerError, BrokerSubscription, STATUS_CHANNEL};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

pub use registry::{
    ClientSubscription, Frame, OverflowPolicy, SubscriptionId, SubscriptionRegistry, MAX_QUEUE_CAPACITY,
};

/// Message sent to clients in the terminal error frame when the broker
/// subscription drops.
pub const CHANNEL_LOST_MESSAGE: &str = "status channel unavailable";

/// Tunables for the fan-out service.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Frames a client may have queued before the overflow policy applies.
    /// Enforced exactly; clamped to `1..=MAX_QUEUE_CAPACITY`.
    pub queue_capacity: usize,
    /// What to do with a client that falls too far behind.
    pub overflow: OverflowPolicy,
    /// Backoff used to resubscribe after the broker subscription drops.
    pub resubscribe: ReconnectConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            overflow: OverflowPolicy::Disconnect,
            resubscribe: ReconnectConfig::default(),
        }
    }
}

/// Errors that prevent the bridge from serving streams.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The initial subscription to the status channel failed.
    #[error("Failed to subscribe to status channel: {0}")]
    Subscribe(#[from] BrokerError),
}

/// Process-local fan-out from the status channel to client streams.
///
/// Created once at startup via [`Bridge::start`]; the returned `Arc` is
/// shared with every request handler.
pub struct Bridge {
    registry: Arc<SubscriptionRegistry>,
    overflow: OverflowPolicy,
    broker_connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    receive_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Bridge {
    /// Subscribe to the status channel and spawn the receive loop.
    ///
    /// An unreachable broker is reported as an error rather than retried;
    /// without a subscription this process cannot serve any stream.
    pub async fn start(broker: Arc<dyn Broker>, config: BridgeConfig) -> Result<Arc<Self>, BridgeError> {
        let subscription = broker.subscribe().await?;
        tracing::info!(
            channel = STATUS_CHANNEL,
            queue_capacity = config.queue_capacity,
            overflow = ?config.overflow,
            "Bridge subscribed to status channel",
        );

        let registry = Arc::new(SubscriptionRegistry::new(config.queue_capacity));
        let broker_connected = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_receive_loop(
            Arc::clone(&registry),
            broker,
            subscription,
            config.resubscribe.clone(),
            Arc::clone(&broker_connected),
            cancel.clone(),
        ));

        Ok(Arc::new(Self {
            registry,
            overflow: config.overflow,
            broker_connected,
            cancel,
            receive_task: Mutex::new(Some(task)),
        }))
    }

    /// Register a new client stream.
    ///
    /// After [`shutdown`](Self::shutdown) the returned handle is already
    /// finished and nothing is registered.
    pub async fn accept(&self) -> SubscriptionHandle {
        let (id, receiver) = self.registry.add().await;
        // Re-checked after registering so a concurrent shutdown cannot
        // leave this entry behind.
        let finished = self.cancel.is_cancelled();
        if finished {
            self.registry.remove(&id).await;
            tracing::debug!(subscription_id = %id, "Subscription refused, bridge is shut down");
        } else {
            tracing::debug!(subscription_id = %id, "Subscription accepted");
        }
        SubscriptionHandle {
            id,
            receiver,
            capacity: self.registry.queue_capacity(),
            overflow: self.overflow,
            registry: Arc::clone(&self.registry),
            finished,
        }
    }

    /// Queue one event on every open stream.
    ///
    /// Streams whose client has gone away are deregistered on the way;
    /// they never hold up delivery to the others. Returns the number of
    /// streams the event was queued on.
    pub async fn dispatch(&self, event: &StatusEvent) -> usize {
        let delivered = self.registry.broadcast(event).await;
        tracing::trace!(search_id = %event.search_id, delivered, "Dispatched status event");
        delivered
    }

    /// Deregister a stream. Stopping an unknown or already stopped stream is
    /// a no-op.
    pub async fn stop(&self, id: SubscriptionId) {
        if self.registry.remove(&id).await {
            tracing::debug!(subscription_id = %id, "Subscription stopped");
        }
    }

    /// Number of currently open streams.
    pub async fn subscriber_count(&self) -> usize {
        self.registry.count().await
    }

    /// Sequence number of the last frame queued for `id`.
    ///
    /// Diagnostic only; frames are never replayed.
    pub async fn last_delivered(&self, id: SubscriptionId) -> Option<u64> {
        self.registry.last_delivered(&id).await
    }

    /// When stream `id` was accepted, if it is still open.
    pub async fn connected_at(&self, id: SubscriptionId) -> Option<Timestamp> {
        self.registry.connected_at(&id).await
    }

    /// Whether the broker subscription is currently established.
    pub fn is_broker_connected(&self) -> bool {
        self.broker_connected.load(Ordering::Relaxed)
    }

    /// Stop the receive loop and close every open stream.
    ///
    /// Streams end without an error frame; clients see a normal close.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.receive_task.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
        let count = self.registry.close_all().await;
        self.broker_connected.store(false, Ordering::Relaxed);
        tracing::info!(count, "Bridge shut down, closed all streams");
    }
}

/// One accepted client stream.
///
/// Yields frames via [`next_frame`](Self::next_frame). Dropping the handle
/// deregisters the stream, which is how a client disconnect propagates.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    receiver: broadcast::Receiver<Frame>,
    capacity: usize,
    overflow: OverflowPolicy,
    registry: Arc<SubscriptionRegistry>,
    finished: bool,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next frame for this client.
    ///
    /// Returns `None` once the stream is over: after a terminal
    /// [`Frame::Error`], after [`Bridge::stop`], or on shutdown.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        loop {
            let backlog = self.receiver.len();
            if backlog > self.capacity {
                if let Some(frame) = self.overflowed(backlog - self.capacity).await {
                    return Some(frame);
                }
            }

            match self.receiver.recv().await {
                Ok(frame @ Frame::Error { .. }) => {
                    self.finished = true;
                    return Some(frame);
                }
                Ok(frame) => return Some(frame),
                Err(RecvError::Lagged(skipped)) => {
                    if let Some(frame) = self.overflowed(skipped as usize).await {
                        return Some(frame);
                    }
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Apply the overflow policy to a client `excess` frames past its bound.
    ///
    /// Returns the terminal frame under `Disconnect`; under `DropOldest`
    /// trims the backlog back to capacity and returns `None`.
    async fn overflowed(&mut self, excess: usize) -> Option<Frame> {
        match self.overflow {
            OverflowPolicy::DropOldest => {
                // `excess` is either still queued or already evicted by the channel.
                let dropped = self.trim_backlog().max(excess);
                tracing::warn!(
                    subscription_id = %self.id,
                    dropped,
                    "Slow client, dropped oldest frames",
                );
                None
            }
            OverflowPolicy::Disconnect => {
                tracing::warn!(
                    subscription_id = %self.id,
                    excess,
                    "Slow client, disconnecting",
                );
                self.finished = true;
                self.registry.remove(&self.id).await;
                Some(Frame::Error {
                    message: format!("client fell behind by {excess} events"),
                })
            }
        }
    }

    /// Discard the oldest queued frames until at most `capacity` remain.
    ///
    /// A terminal error frame is always the newest frame on a queue, so it
    /// is never among the discarded ones.
    fn trim_backlog(&mut self) -> usize {
        let mut dropped = 0;
        while self.receiver.len() > self.capacity {
            match self.receiver.try_recv() {
                Ok(_) => dropped += 1,
                Err(TryRecvError::Lagged(skipped)) => dropped += skipped as usize,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        dropped
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.registry.remove_detached(self.id);
        tracing::debug!(subscription_id = %self.id, "Subscription released");
    }
}

/// The per-process receive loop.
///
/// Runs until cancelled. When the broker subscription fails, every open
/// stream gets one terminal error frame and is closed; the loop then
/// resubscribes with exponential backoff so new streams can be served.
async fn run_receive_loop(
    registry: Arc<SubscriptionRegistry>,
    broker: Arc<dyn Broker>,
    mut subscription: BrokerSubscription,
    resubscribe: ReconnectConfig,
    broker_connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let failure = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Receive loop cancelled");
                return;
            }
            reason = pump(&registry, &mut subscription) => reason,
        };

        broker_connected.store(false, Ordering::Relaxed);
        let notified = registry.close_all_with_error(CHANNEL_LOST_MESSAGE).await;
        tracing::error!(error = %failure, notified, "Broker subscription lost, closed open streams");

        match resubscribe_loop(broker.as_ref(), &resubscribe, &cancel).await {
            Some(next) => {
                subscription = next;
                broker_connected.store(true, Ordering::Relaxed);
            }
            None => return,
        }
    }
}

/// Forward payloads until the subscription fails. Returns the failure reason.
async fn pump(registry: &SubscriptionRegistry, subscription: &mut BrokerSubscription) -> String {
    while let Some(item) = subscription.next().await {
        match item {
            Ok(payload) => match parse_status_event(&payload) {
                Ok(event) => {
                    let delivered = registry.broadcast(&event).await;
                    tracing::debug!(
                        search_id = %event.search_id,
                        status = ?event.status,
                        delivered,
                        "Status event fanned out",
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        raw_message = %payload,
                        "Dropping malformed status payload",
                    );
                }
            },
            Err(e) => return e.to_string(),
        }
    }
    "broker subscription closed".to_string()
}

/// Resubscribe with exponential backoff.
///
/// Returns `None` if `cancel` fires first.
async fn resubscribe_loop(
    broker: &dyn Broker,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<BrokerSubscription> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tracing::info!(attempt, channel = STATUS_CHANNEL, "Resubscribing to status channel");

        tokio::select! {
            _ = cancel.cancelled() => return None,
            result = broker.subscribe() => match result {
                Ok(subscription) => {
                    tracing::info!(attempt, "Resubscribed to status channel");
                    return Some(subscription);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Resubscribe attempt {attempt} failed",
                    );
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
