//! Kameo-based resilient WebSocket client for the scan dashboard's live
//! event feed.

pub mod core;
pub mod dispatch;
pub mod manager;
pub mod session;
pub mod testing;
pub mod tls;
pub mod transport;

pub use crate::core::{
    ConnectionState, Envelope, EventKind, FeedError, FeedResult, RetryConfig, Scope,
    SessionConfig,
};
pub use crate::dispatch::{EventDispatcher, EventPayload, SubscriptionHandle, event};
pub use crate::manager::FeedManager;
pub use crate::session::{FeedBinding, SessionHandle};
