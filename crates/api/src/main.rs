use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use searchcast_api::bridge::Bridge;
use searchcast_api::config::ServerConfig;
use searchcast_api::router::build_app_router;
use searchcast_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "searchcast_api=debug,searchcast_events=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Broker ---
    // An unreachable broker is fatal: without it no stream can be served.
    let broker = searchcast_events::connect(&config.broker_url)
        .await
        .context("Failed to connect to broker")?;
    broker.ping().await.context("Broker health check failed")?;
    tracing::info!("Broker health check passed");

    // --- Bridge ---
    let bridge = Bridge::start(Arc::clone(&broker), config.bridge.clone())
        .await
        .context("Failed to start bridge")?;
    tracing::info!("Bridge started");

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        bridge: Arc::clone(&bridge),
        broker,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    // Open event streams never finish on their own, so the bridge has to
    // close them before graceful shutdown can drain connections.
    let shutdown_bridge = Arc::clone(&bridge);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let count = shutdown_bridge.subscriber_count().await;
            tracing::info!(count, "Closing open event streams");
            shutdown_bridge.shutdown().await;
        })
        .await
        .context("Server error")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
