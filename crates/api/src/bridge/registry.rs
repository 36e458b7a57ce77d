use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use searchcast_core::types::Timestamp;
use searchcast_core::StatusEvent;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Largest per-client queue the registry will allocate.
pub const MAX_QUEUE_CAPACITY: usize = 65_536;

/// Identifier of one open client stream.
pub type SubscriptionId = Uuid;

/// A unit written to a client stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A status event, tagged with the process-wide dispatch sequence.
    Status { seq: u64, event: StatusEvent },
    /// Terminal frame. Nothing follows it on the same stream.
    Error { message: String },
}

/// What happens when a client falls `queue_capacity` frames behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Send a terminal error frame and close the stream.
    #[default]
    Disconnect,
    /// Discard the oldest queued frames and keep streaming.
    DropOldest,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disconnect" => Ok(OverflowPolicy::Disconnect),
            "drop-oldest" | "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(format!("unknown overflow policy '{other}'")),
        }
    }
}

/// Bookkeeping for a single open stream.
pub struct ClientSubscription {
    /// Per-client queue. The receiving half lives in the
    /// [`SubscriptionHandle`](super::SubscriptionHandle), which holds the
    /// backlog to `queue_capacity`; the channel itself may be larger.
    sender: broadcast::Sender<Frame>,
    /// When this stream was accepted.
    pub connected_at: Timestamp,
    /// Sequence number of the last frame queued for this client; 0 = none.
    last_delivered: AtomicU64,
}

/// The live subscription set.
///
/// Mutated by accept/stop from connection handlers while the receive loop
/// iterates it; all access goes through the interior `RwLock`. Writes to
/// individual queues never block, so dispatch holds the read lock only for
/// the duration of one pass.
pub struct SubscriptionRegistry {
    subscriptions: RwLock<HashMap<SubscriptionId, ClientSubscription>>,
    queue_capacity: usize,
    next_seq: AtomicU64,
}

impl SubscriptionRegistry {
    /// `queue_capacity` is clamped to `1..=MAX_QUEUE_CAPACITY`.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.clamp(1, MAX_QUEUE_CAPACITY),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Frames a client may have queued before its overflow policy applies.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Register a new subscription and return the receiving end of its queue.
    pub async fn add(&self) -> (SubscriptionId, broadcast::Receiver<Frame>) {
        let id = Uuid::new_v4();
        // One spare slot so a terminal error frame never evicts a queued status.
        let (sender, receiver) = broadcast::channel(self.queue_capacity + 1);
        let subscription = ClientSubscription {
            sender,
            connected_at: chrono::Utc::now(),
            last_delivered: AtomicU64::new(0),
        };
        self.subscriptions.write().await.insert(id, subscription);
        (id, receiver)
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub async fn remove(&self, id: &SubscriptionId) -> bool {
        self.subscriptions.write().await.remove(id).is_some()
    }

    /// Remove a subscription from a synchronous context (a `Drop` impl).
    ///
    /// Takes the lock directly when it is free, otherwise hands the removal
    /// to the runtime. If neither is possible the next dispatch finds the
    /// closed queue and removes the entry itself.
    pub(crate) fn remove_detached(self: &Arc<Self>, id: SubscriptionId) {
        if let Ok(mut subscriptions) = self.subscriptions.try_write() {
            subscriptions.remove(&id);
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let registry = Arc::clone(self);
            runtime.spawn(async move {
                registry.remove(&id).await;
            });
        }
    }

    /// Queue `event` on every open subscription.
    ///
    /// Subscriptions whose receiving end is gone are removed. Returns the
    /// number of subscriptions the event was queued on.
    pub async fn broadcast(&self, event: &StatusEvent) -> usize {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = Frame::Status {
            seq,
            event: event.clone(),
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let subscriptions = self.subscriptions.read().await;
            for (id, subscription) in subscriptions.iter() {
                match subscription.sender.send(frame.clone()) {
                    Ok(_) => {
                        subscription.last_delivered.store(seq, Ordering::Relaxed);
                        delivered += 1;
                    }
                    Err(_) => dead.push(*id),
                }
            }
        }

        if !dead.is_empty() {
            let mut subscriptions = self.subscriptions.write().await;
            for id in &dead {
                subscriptions.remove(id);
            }
            tracing::debug!(count = dead.len(), "Removed closed subscriptions during dispatch");
        }

        delivered
    }

    /// Send one terminal error frame to every subscription, then drop them all.
    ///
    /// Returns the number of subscriptions that were closed.
    pub async fn close_all_with_error(&self, message: &str) -> usize {
        let mut subscriptions = self.subscriptions.write().await;
        let count = subscriptions.len();
        for subscription in subscriptions.values() {
            let _ = subscription.sender.send(Frame::Error {
                message: message.to_string(),
            });
        }
        subscriptions.clear();
        count
    }

    /// Drop every subscription without a farewell frame; each stream ends.
    pub async fn close_all(&self) -> usize {
        let mut subscriptions = self.subscriptions.write().await;
        let count = subscriptions.len();
        subscriptions.clear();
        count
    }

    /// Current number of open subscriptions.
    pub async fn count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Sequence number of the last frame queued for `id`, if any.
    pub async fn last_delivered(&self, id: &SubscriptionId) -> Option<u64> {
        self.subscriptions
            .read()
            .await
            .get(id)
            .map(|s| s.last_delivered.load(Ordering::Relaxed))
            .filter(|&seq| seq > 0)
    }

    /// When `id` was accepted, if it is still open.
    pub async fn connected_at(&self, id: &SubscriptionId) -> Option<Timestamp> {
        self.subscriptions.read().await.get(id).map(|s| s.connected_at)
    }
}
