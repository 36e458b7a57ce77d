//! End-to-end: a real server on a loopback port, the in-memory broker, and
//! a reconciliation session talking to both over HTTP.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use searchcast_api::bridge::Bridge;
use searchcast_api::config::ServerConfig;
use searchcast_api::router::build_app_router;
use searchcast_api::state::AppState;
use searchcast_client::{
    ConnectionState, HttpJobSource, HttpStreamTransport, PageRequest, ReconcileSession,
    ReconnectPolicy,
};
use searchcast_core::backoff::ReconnectConfig;
use searchcast_core::{SearchStatus, StatusEvent};
use searchcast_events::{Broker, MemoryBroker};
use serde_json::json;
use tokio_util::sync::CancellationToken;

struct Server {
    base_url: String,
    broker: Arc<MemoryBroker>,
    bridge: Arc<Bridge>,
}

/// Serve the production router plus a stand-in job listing.
async fn spawn_server() -> Server {
    let config = ServerConfig::from_lookup(|key| match key {
        "BROKER_URL" => Some("memory://".into()),
        // Keep-alive writes are how the server notices a vanished client.
        "SSE_KEEPALIVE_SECS" => Some("1".into()),
        _ => None,
    })
    .unwrap();

    let broker = Arc::new(MemoryBroker::default());
    let bridge = Bridge::start(broker.clone() as Arc<dyn Broker>, config.bridge.clone())
        .await
        .unwrap();
    let state = AppState {
        config: Arc::new(config.clone()),
        bridge: Arc::clone(&bridge),
        broker: broker.clone() as Arc<dyn Broker>,
    };

    let listing = Router::new().route(
        "/api/v1/searches",
        get(|| async {
            Json(json!({
                "data": [
                    {"id": "s1", "status": "pending", "step": "queued"},
                    {"id": "s2"}
                ],
                "total": 2
            }))
        }),
    );
    let app = build_app_router(state, &config).merge(listing);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        base_url: format!("http://{addr}"),
        broker,
        bridge,
    }
}

fn client_session(server: &Server) -> Arc<ReconcileSession> {
    let transport = Arc::new(HttpStreamTransport::new(format!(
        "{}/api/v1/search-status/stream",
        server.base_url
    )));
    let source = Arc::new(HttpJobSource::new(format!("{}/api/v1/searches", server.base_url)));
    Arc::new(ReconcileSession::new(
        transport,
        source,
        ReconnectPolicy::Backoff(ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        }),
    ))
}

async fn wait_for_open(session: &ReconcileSession, server: &Server) {
    let mut state = session.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Open || *s == ConnectionState::Receiving),
    )
    .await
    .expect("stream never opened")
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while server.bridge.subscriber_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server never registered the stream");
}

/// Record each distinct status the mirror shows for `search_id` until `done`.
fn record_statuses(
    session: &ReconcileSession,
    search_id: &'static str,
    done: CancellationToken,
) -> tokio::task::JoinHandle<Vec<SearchStatus>> {
    let mirror = session.mirror();
    tokio::spawn(async move {
        let mut seen: Vec<SearchStatus> = Vec::new();
        loop {
            if let Some(status) = mirror.read().await.get(search_id).map(|j| j.status) {
                if seen.last() != Some(&status) {
                    seen.push(status);
                }
            }
            tokio::select! {
                _ = done.cancelled() => return seen,
                _ = tokio::time::sleep(Duration::from_millis(1)) => {}
            }
        }
    })
}

/// Publish `event` until the mirror shows `step` for its job.
///
/// Republishing covers the window in which the client is reconnecting;
/// events sent while no stream is open are lost by design.
async fn publish_until_mirrored(session: &ReconcileSession, broker: &MemoryBroker, event: StatusEvent) {
    let step = event.step.clone().unwrap_or_default();
    let mirror = session.mirror();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            broker.publish(&event).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            if mirror.read().await.get(&event.search_id).map(|j| j.step.clone()) == Some(step.clone()) {
                return;
            }
        }
    })
    .await
    .expect("update never reached the mirror");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mirror_follows_live_updates_across_a_broker_fault() {
    let server = spawn_server().await;
    let session = client_session(&server);

    // --- Seed from the bulk listing ---
    let seeded = session.refresh_page(PageRequest::default()).await.unwrap();
    assert_eq!(seeded, 2);
    {
        let mirror = session.mirror();
        let mirror = mirror.read().await;
        assert_eq!(mirror.get("s2").unwrap().status, SearchStatus::Pending);
        assert_eq!(mirror.get("s2").unwrap().step, "pending");
    }

    let recording_done = CancellationToken::new();
    let recorder = record_statuses(&session, "s1", recording_done.clone());

    // --- Live updates ---
    let cancel = CancellationToken::new();
    let runner = tokio::spawn({
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        async move { session.run(cancel).await }
    });
    wait_for_open(&session, &server).await;

    server
        .broker
        .publish(&StatusEvent::new("s99", SearchStatus::Completed, "done"))
        .await
        .unwrap();
    publish_until_mirrored(
        &session,
        &server.broker,
        StatusEvent::new("s1", SearchStatus::Active, "scraping"),
    )
    .await;

    {
        let mirror = session.mirror();
        let mirror = mirror.read().await;
        assert_eq!(mirror.get("s1").unwrap().status, SearchStatus::Active);
        assert_eq!(mirror.get("s2").unwrap().step, "pending");
        assert!(mirror.get("s99").is_none());
        assert_eq!(mirror.len(), 2);
    }

    // --- Broker fault: the server sends an error frame, the client reconnects ---
    server.broker.inject_fault("connection reset");
    publish_until_mirrored(
        &session,
        &server.broker,
        StatusEvent::new("s1", SearchStatus::Completed, "done"),
    )
    .await;
    assert_eq!(
        session.mirror().read().await.get("s1").unwrap().status,
        SearchStatus::Completed
    );

    // --- s1 only ever moved forward ---
    recording_done.cancel();
    let observed = recorder.await.unwrap();
    assert_eq!(observed.first(), Some(&SearchStatus::Pending));
    assert_eq!(observed.last(), Some(&SearchStatus::Completed));
    for pair in observed.windows(2) {
        assert!(
            pair[0].can_advance_to(pair[1]),
            "backward transition {:?} -> {:?} in {observed:?}",
            pair[0],
            pair[1]
        );
    }

    // --- Teardown ---
    cancel.cancel();
    runner.await.unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);

    tokio::time::timeout(Duration::from_secs(5), async {
        while server.bridge.subscriber_count().await != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server kept the closed stream registered");
}

#[tokio::test]
async fn refresh_page_reports_server_errors() {
    let server = spawn_server().await;
    let source = HttpJobSource::new(format!("{}/api/v1/no-such-listing", server.base_url));
    let session = ReconcileSession::new(
        Arc::new(HttpStreamTransport::new(format!("{}/unused", server.base_url))),
        Arc::new(source),
        ReconnectPolicy::Never,
    );

    let err = session.refresh_page(PageRequest::default()).await.unwrap_err();
    assert!(matches!(err, searchcast_client::ClientError::Status { status: 404, .. }));
}
