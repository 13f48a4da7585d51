//! Scope ownership: the lazily-created shared dashboard session plus the
//! per-scan session map.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;
use tracing::info;

use crate::core::{CacheHook, Scope, SessionConfig};
use crate::session::SessionHandle;
use crate::transport::Transport;
use crate::transport::tungstenite::TungsteniteTransport;

/// Owns every live session in the process.
///
/// The dashboard session is created lazily on first use and lives until
/// [`shutdown`](Self::shutdown): consumers subscribe through its handle
/// and must not close it themselves. Per-scan sessions are created on
/// demand; asking for a scan id that is already live returns the existing
/// handle rather than opening a second connection.
pub struct FeedManager<T = TungsteniteTransport>
where
    T: Transport,
{
    config: SessionConfig,
    transport: T,
    cache: Option<CacheHook>,
    shared: OnceCell<SessionHandle<T>>,
    scans: Mutex<HashMap<String, SessionHandle<T>>>,
}

impl FeedManager<TungsteniteTransport> {
    pub fn new(config: SessionConfig, cache: Option<CacheHook>) -> Self {
        Self::with_transport(config, TungsteniteTransport, cache)
    }
}

impl<T> FeedManager<T>
where
    T: Transport,
{
    pub fn with_transport(config: SessionConfig, transport: T, cache: Option<CacheHook>) -> Self {
        Self {
            config,
            transport,
            cache,
            shared: OnceCell::new(),
            scans: Mutex::new(HashMap::new()),
        }
    }

    fn scans(&self) -> MutexGuard<'_, HashMap<String, SessionHandle<T>>> {
        self.scans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The shared broadcast session, connecting it on first use.
    pub async fn dashboard(&self) -> SessionHandle<T> {
        self.shared
            .get_or_init(|| async {
                info!("creating shared dashboard session");
                let handle = SessionHandle::spawn(
                    Scope::Dashboard,
                    self.config.clone(),
                    self.transport.clone(),
                    self.cache.clone(),
                );
                let _ = handle.open().await;
                handle
            })
            .await
            .clone()
    }

    /// Session for one live scan, connecting it if this scan id is new.
    pub async fn open_scan(&self, scan_id: &str) -> SessionHandle<T> {
        let (handle, created) = {
            let mut scans = self.scans();
            match scans.get(scan_id) {
                Some(handle) => (handle.clone(), false),
                None => {
                    let handle = SessionHandle::spawn(
                        Scope::Scan(scan_id.to_string()),
                        self.config.clone(),
                        self.transport.clone(),
                        self.cache.clone(),
                    );
                    scans.insert(scan_id.to_string(), handle.clone());
                    (handle, true)
                }
            }
        };
        if created {
            let _ = handle.open().await;
        }
        handle
    }

    /// Tear down one scan session (the owning view was abandoned).
    pub async fn close_scan(&self, scan_id: &str) {
        let handle = self.scans().remove(scan_id);
        if let Some(handle) = handle {
            let _ = handle.close().await;
        }
    }

    /// Process teardown path: closes every scan session and the shared
    /// session. Nothing else may close the shared session.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.scans().drain().map(|(_, handle)| handle).collect();
        for handle in drained {
            let _ = handle.close().await;
        }
        if let Some(shared) = self.shared.get() {
            let _ = shared.close().await;
        }
    }
}
