use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Convenience result alias for feed operations.
pub type FeedResult<T> = Result<T, FeedError>;

/// Canonical error surface for the event feed client.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("transport error ({context}): {error}")]
    Transport {
        context: &'static str,
        error: String,
    },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("actor error: {0}")]
    Actor(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Lifecycle of one connection scope.
///
/// `Failed` is terminal for automatic recovery: the session only leaves it
/// through an explicit re-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, kameo::Reply)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    #[inline]
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// Identifies which logical channel a session represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The process-wide broadcast channel.
    Dashboard,
    /// A single live scan, keyed by scan id.
    Scan(String),
}

impl Scope {
    pub fn key(&self) -> &str {
        match self {
            Scope::Dashboard => "dashboard",
            Scope::Scan(id) => id.as_str(),
        }
    }

    fn ws_path(&self) -> String {
        match self {
            Scope::Dashboard => "/api/scans/ws/dashboard".to_string(),
            Scope::Scan(id) => format!("/api/scans/ws/{id}"),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Dashboard => f.write_str("dashboard"),
            Scope::Scan(id) => write!(f, "scan/{id}"),
        }
    }
}

/// Backend dev server used when the hosting context is plain loopback.
const DEV_ENDPOINT: &str = "localhost:8000";

/// Where and how to reach the event server.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Use `wss:` when the hosting context itself is served securely.
    pub secure: bool,
    /// Host (and optional port) of the hosting context.
    pub host: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            secure: false,
            host: "localhost".to_string(),
        }
    }
}

impl EndpointConfig {
    /// Derive the websocket URL for a scope.
    pub fn url_for(&self, scope: &Scope) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let host = if self.host == "localhost" {
            DEV_ENDPOINT
        } else {
            self.host.as_str()
        };
        format!("{scheme}://{host}{}", scope.ws_path())
    }
}

/// Reconnect delay policy parameters.
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Per-session configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub endpoint: EndpointConfig,
    pub retry: RetryConfig,
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            retry: RetryConfig::default(),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Hook interface for invalidating the external query cache without
/// coupling the feed to the HTTP layer.
pub trait CacheInvalidator: Send + Sync + 'static {
    /// Mark the named data buckets stale.
    fn mark_stale(&self, buckets: &[&str]);

    /// Ask for an immediate refetch instead of waiting for the next poll.
    fn refetch_now(&self, _buckets: &[&str]) {}
}

/// Convenient alias for passing around boxed cache hooks.
pub type CacheHook = Arc<dyn CacheInvalidator>;

/// Buckets marked stale when a broadcast update or scan completion arrives.
pub const STALE_BUCKETS: &[&str] = &["dashboard_metrics", "quick_stats", "reports", "scans"];

/// Buckets refetched immediately after invalidation.
pub const REFRESH_BUCKETS: &[&str] = &["dashboard_metrics", "quick_stats"];
