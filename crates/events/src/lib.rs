//! Broker channel for search-status events.
//!
//! This crate provides the publish/subscribe seam between the workflow
//! publisher and the bridge:
//!
//! - [`Broker`] - the pub/sub contract on the single well-known topic
//!   [`STATUS_CHANNEL`].
//! - [`RedisBroker`] - production implementation on Redis pub/sub.
//! - [`MemoryBroker`] - in-process implementation backed by
//!   `tokio::sync::broadcast`, used for local development and tests.
//! - [`connect`] - pick an implementation from a broker URL.

pub mod broker;
pub mod memory;
pub mod redis_broker;

pub use broker::{connect, Broker, BrokerError, BrokerSubscription, STATUS_CHANNEL};
pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;
