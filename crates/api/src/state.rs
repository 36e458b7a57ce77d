use std::sync::Arc;

use searchcast_events::Broker;

use crate::bridge::Bridge;
use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Fan-out from the status channel to open event streams.
    pub bridge: Arc<Bridge>,
    /// Broker used for publishing and health checks.
    pub broker: Arc<dyn Broker>,
}
