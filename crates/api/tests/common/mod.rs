#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use searchcast_api::bridge::{Bridge, BridgeConfig};
use searchcast_api::config::ServerConfig;
use searchcast_api::router::build_app_router;
use searchcast_api::state::AppState;
use searchcast_core::backoff::ReconnectConfig;
use searchcast_events::{Broker, MemoryBroker};

/// Build a test `ServerConfig` with safe defaults and an in-memory broker.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        broker_url: "memory://".to_string(),
        sse_keepalive_secs: 15,
        bridge: test_bridge_config(),
    }
}

/// Bridge settings with a roomy queue and fast resubscribe.
pub fn test_bridge_config() -> BridgeConfig {
    BridgeConfig {
        queue_capacity: 1024,
        resubscribe: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
        },
        ..Default::default()
    }
}

/// Start a bridge on a fresh in-memory broker.
pub async fn start_bridge(config: BridgeConfig) -> (Arc<MemoryBroker>, Arc<Bridge>) {
    let broker = Arc::new(MemoryBroker::default());
    let bridge = Bridge::start(broker.clone() as Arc<dyn Broker>, config)
        .await
        .expect("memory broker subscription cannot fail");
    (broker, bridge)
}

/// Everything an HTTP-level test needs.
pub struct TestApp {
    pub router: Router,
    pub broker: Arc<MemoryBroker>,
    pub bridge: Arc<Bridge>,
}

/// Build the full application router with all middleware layers.
///
/// Uses the same [`build_app_router`] as `main.rs` so integration tests
/// exercise the production middleware stack.
pub async fn build_test_app() -> TestApp {
    let config = test_config();
    let (broker, bridge) = start_bridge(config.bridge.clone()).await;

    let state = AppState {
        config: Arc::new(config.clone()),
        bridge: Arc::clone(&bridge),
        broker: broker.clone() as Arc<dyn Broker>,
    };

    TestApp {
        router: build_app_router(state, &config),
        broker,
        bridge,
    }
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Wait until `bridge` reports `expected` open streams.
pub async fn wait_for_subscribers(bridge: &Bridge, expected: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while bridge.subscriber_count().await != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("bridge never reached {expected} subscribers"));
}

// ---------------------------------------------------------------------------
// Event-stream reading
// ---------------------------------------------------------------------------

/// One decoded `event:`/`data:` unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseEvent {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.data).unwrap()
    }
}

/// Result of waiting for the next unit on a stream.
#[derive(Debug)]
pub enum Next {
    Event(SseEvent),
    Closed,
    TimedOut,
}

/// Incremental reader over an event-stream response body.
pub struct EventReader {
    body: Body,
    buffer: String,
}

impl EventReader {
    pub fn new(response: Response<Body>) -> Self {
        Self {
            body: response.into_body(),
            buffer: String::new(),
        }
    }

    /// Next non-comment unit, waiting at most `wait`.
    pub async fn next(&mut self, wait: Duration) -> Next {
        match tokio::time::timeout(wait, self.read_event()).await {
            Ok(Some(event)) => Next::Event(event),
            Ok(None) => Next::Closed,
            Err(_) => Next::TimedOut,
        }
    }

    /// Next unit, panicking unless one arrives within two seconds.
    pub async fn expect_event(&mut self) -> SseEvent {
        match self.next(Duration::from_secs(2)).await {
            Next::Event(event) => event,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    async fn read_event(&mut self) -> Option<SseEvent> {
        loop {
            if let Some(pos) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..pos + 2).collect();
                if let Some(event) = parse_block(&block) {
                    return Some(event);
                }
                continue;
            }
            let frame = self.body.frame().await?.ok()?;
            if let Ok(data) = frame.into_data() {
                self.buffer.push_str(&String::from_utf8_lossy(&data));
            }
        }
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data = Vec::new();
    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }
    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}
