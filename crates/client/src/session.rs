//! The reconciliation session: one event stream feeding one job mirror.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Open -> Receiving
//!                     ^                    |
//!                     |                    v
//!                     +------(backoff)--- Error
//! ```
//!
//! Any state moves to `Disconnected` when the session is cancelled. Events
//! published while the stream is down are lost; the bulk fetch path
//! ([`ReconcileSession::refresh_page`]) is how the mirror catches up.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use searchcast_core::backoff::{next_delay, ReconnectConfig};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::frame::StreamMessage;
use crate::mirror::{JobMirror, MergeOutcome};
use crate::source::{JobSource, PageRequest};
use crate::transport::{FrameStream, StreamTransport};

/// Where the session is in its stream lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Receiving,
    Error,
}

/// What to do after the stream fails.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Stay in [`ConnectionState::Error`] and return from `run`.
    Never,
    /// Reopen with exponential backoff. The delay resets after every
    /// successful open.
    Backoff(ReconnectConfig),
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Backoff(ReconnectConfig::default())
    }
}

/// How one stream connection ended.
enum StreamEnd {
    Cancelled,
    Failed(String),
}

/// Keeps a [`JobMirror`] in sync with the server.
pub struct ReconcileSession {
    transport: Arc<dyn StreamTransport>,
    source: Arc<dyn JobSource>,
    mirror: Arc<RwLock<JobMirror>>,
    state: watch::Sender<ConnectionState>,
    policy: ReconnectPolicy,
}

impl ReconcileSession {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        source: Arc<dyn JobSource>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            source,
            mirror: Arc::new(RwLock::new(JobMirror::new())),
            state,
            policy,
        }
    }

    /// Shared handle to the mirror, for readers.
    pub fn mirror(&self) -> Arc<RwLock<JobMirror>> {
        Arc::clone(&self.mirror)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Fetch one page of jobs and replace the mirror with it.
    ///
    /// Independent of the stream; safe to call in any state. Returns the
    /// number of jobs now mirrored.
    pub async fn refresh_page(&self, page: PageRequest) -> Result<usize, ClientError> {
        let fetched = self.source.fetch_page(page).await?;
        let mut mirror = self.mirror.write().await;
        mirror.seed(fetched.data);
        tracing::debug!(page = page.page, per_page = page.per_page, jobs = mirror.len(), "Mirror refreshed");
        Ok(mirror.len())
    }

    /// Drive the stream until `cancel` fires (or, under
    /// [`ReconnectPolicy::Never`], until the first failure).
    pub async fn run(&self, cancel: CancellationToken) {
        let backoff = match &self.policy {
            ReconnectPolicy::Backoff(config) => Some(config),
            ReconnectPolicy::Never => None,
        };
        let mut delay = backoff.map(|c| c.initial_delay).unwrap_or_default();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.set_state(ConnectionState::Connecting);

            let opened = tokio::select! {
                _ = cancel.cancelled() => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                result = self.transport.open() => result,
            };

            match opened {
                Ok(stream) => {
                    tracing::info!(attempt, "Search status stream open");
                    self.set_state(ConnectionState::Open);
                    attempt = 0;
                    if let Some(config) = backoff {
                        delay = config.initial_delay;
                    }

                    match self.consume(stream, &cancel).await {
                        StreamEnd::Cancelled => {
                            self.set_state(ConnectionState::Disconnected);
                            return;
                        }
                        StreamEnd::Failed(reason) => {
                            tracing::warn!(error = %reason, "Search status stream failed");
                            self.set_state(ConnectionState::Error);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to open search status stream (attempt {attempt})");
                    self.set_state(ConnectionState::Error);
                }
            }

            let Some(config) = backoff else {
                return;
            };

            tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting search status stream");
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay.max(Duration::from_millis(1)), config);
        }
    }

    /// Read frames into the mirror until the stream ends or `cancel` fires.
    async fn consume(&self, mut stream: FrameStream, cancel: &CancellationToken) -> StreamEnd {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                item = stream.next() => item,
            };

            let frame = match item {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return StreamEnd::Failed(e.to_string()),
                None => return StreamEnd::Failed("stream closed by server".to_string()),
            };

            self.set_state(ConnectionState::Receiving);
            match frame.classify() {
                StreamMessage::StatusUpdate(event) => {
                    let outcome = self.mirror.write().await.apply(&event);
                    if outcome == MergeOutcome::Updated {
                        tracing::debug!(
                            search_id = %event.search_id,
                            status = ?event.status,
                            step = ?event.step,
                            "Mirror updated from stream",
                        );
                    }
                }
                StreamMessage::Error(message) => return StreamEnd::Failed(message),
                StreamMessage::Ignored => {}
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::trace!(from = ?*current, to = ?next, "Connection state changed");
            *current = next;
            true
        });
    }
}
