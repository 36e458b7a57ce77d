use std::str::FromStr;
use std::time::Duration;

use searchcast_core::backoff::ReconnectConfig;

use crate::bridge::{BridgeConfig, OverflowPolicy, MAX_QUEUE_CAPACITY};

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`). Applies to
    /// producing the response head only; event streams stay open.
    pub request_timeout_secs: u64,
    /// Broker URL (default: `redis://127.0.0.1:6379`).
    pub broker_url: String,
    /// Interval between keep-alive comments on idle event streams.
    pub sse_keepalive_secs: u64,
    /// Fan-out tuning (per-client queue and resubscribe backoff).
    pub bridge: BridgeConfig,
}

/// A configuration value that could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                   |
    /// |--------------------------------|---------------------------|
    /// | `HOST`                         | `0.0.0.0`                 |
    /// | `PORT`                         | `3000`                    |
    /// | `CORS_ORIGINS`                 | `http://localhost:5173`   |
    /// | `REQUEST_TIMEOUT_SECS`         | `30`                      |
    /// | `BROKER_URL`                   | `redis://127.0.0.1:6379`  |
    /// | `SSE_KEEPALIVE_SECS`           | `15`                      |
    /// | `SUBSCRIBER_QUEUE_CAPACITY`    | `64` (max `65536`)        |
    /// | `SUBSCRIBER_OVERFLOW`          | `disconnect`              |
    /// | `RESUBSCRIBE_INITIAL_DELAY_MS` | `1000`                    |
    /// | `RESUBSCRIBE_MAX_DELAY_MS`     | `30000`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&lookup, "PORT", 3000, "a valid u16")?;

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 =
            parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 30, "a valid u64")?;

        let broker_url = lookup("BROKER_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".into());

        let sse_keepalive_secs: u64 =
            parse_or(&lookup, "SSE_KEEPALIVE_SECS", 15, "a positive number of seconds")?;
        if sse_keepalive_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "SSE_KEEPALIVE_SECS",
                value: "0".into(),
                expected: "a positive number of seconds",
            });
        }

        const QUEUE_CAPACITY_RANGE: &str = "an integer between 1 and 65536";
        let queue_capacity: usize =
            parse_or(&lookup, "SUBSCRIBER_QUEUE_CAPACITY", 64, QUEUE_CAPACITY_RANGE)?;
        if !(1..=MAX_QUEUE_CAPACITY).contains(&queue_capacity) {
            return Err(ConfigError::Invalid {
                key: "SUBSCRIBER_QUEUE_CAPACITY",
                value: queue_capacity.to_string(),
                expected: QUEUE_CAPACITY_RANGE,
            });
        }

        let overflow: OverflowPolicy = parse_or(
            &lookup,
            "SUBSCRIBER_OVERFLOW",
            OverflowPolicy::Disconnect,
            "`disconnect` or `drop-oldest`",
        )?;

        let initial_ms: u64 =
            parse_or(&lookup, "RESUBSCRIBE_INITIAL_DELAY_MS", 1000, "a valid u64")?;
        let max_ms: u64 = parse_or(&lookup, "RESUBSCRIBE_MAX_DELAY_MS", 30_000, "a valid u64")?;

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            broker_url,
            sse_keepalive_secs,
            bridge: BridgeConfig {
                queue_capacity,
                overflow,
                resubscribe: ReconnectConfig {
                    initial_delay: Duration::from_millis(initial_ms),
                    max_delay: Duration::from_millis(max_ms.max(initial_ms)),
                    ..Default::default()
                },
            },
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value, expected }),
    }
}
