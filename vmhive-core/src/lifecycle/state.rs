//! Shared daemon state handed to route handlers and background tasks
//!
//! Collaborators read through this facade; only the lifecycle manager
//! installs or removes the database handles and certificates.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info};

use crate::{
    abstractions::ClusterDatabase,
    certs::CertificateBundle,
    config::DaemonConfig,
    error::{HiveError, HiveResult},
    lifecycle::{shutdown::ShutdownSignal, signals::LifecycleSignals},
    security::{AccessController, AuthenticationGate, TrustStore},
    storage::LocalDatabase,
    types::DaemonEvent,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct DaemonState {
    inner: Arc<StateInner>,
}

struct StateInner {
    config: DaemonConfig,
    signals: LifecycleSignals,
    trust: Arc<TrustStore>,
    auth: Arc<AuthenticationGate>,
    access: Arc<AccessController>,
    local_db: RwLock<Option<Arc<LocalDatabase>>>,
    cluster_db: RwLock<Option<Arc<dyn ClusterDatabase>>>,
    certificates: RwLock<Option<CertificateBundle>>,
    clustered: AtomicBool,
    events: broadcast::Sender<DaemonEvent>,
    shutdown_requests: mpsc::Sender<ShutdownSignal>,
    membership_lock: Arc<Mutex<()>>,
}

impl DaemonState {
    /// Create the state and the receiving end of in-band shutdown requests
    pub fn new(config: DaemonConfig) -> (Self, mpsc::Receiver<ShutdownSignal>) {
        let signals = LifecycleSignals::new();
        let trust = Arc::new(TrustStore::new());
        let auth = Arc::new(AuthenticationGate::new(trust.clone(), signals.shutdown.clone()));
        let access = Arc::new(AccessController::new(trust.clone()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_requests, rx) = mpsc::channel(1);

        let state = Self {
            inner: Arc::new(StateInner {
                config,
                signals,
                trust,
                auth,
                access,
                local_db: RwLock::new(None),
                cluster_db: RwLock::new(None),
                certificates: RwLock::new(None),
                clustered: AtomicBool::new(false),
                events,
                shutdown_requests,
                membership_lock: Arc::new(Mutex::new(())),
            }),
        };
        (state, rx)
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.inner.config
    }

    pub fn signals(&self) -> &LifecycleSignals {
        &self.inner.signals
    }

    pub fn trust_store(&self) -> &Arc<TrustStore> {
        &self.inner.trust
    }

    pub fn auth(&self) -> &AuthenticationGate {
        &self.inner.auth
    }

    pub fn access(&self) -> &AccessController {
        &self.inner.access
    }

    /// Serializes role rebalancing and member upgrades
    pub fn membership_lock(&self) -> Arc<Mutex<()>> {
        self.inner.membership_lock.clone()
    }

    pub fn local_db(&self) -> HiveResult<Arc<LocalDatabase>> {
        self.inner
            .local_db
            .read()
            .clone()
            .ok_or_else(|| HiveError::not_initialized("local database"))
    }

    pub fn cluster_db(&self) -> HiveResult<Arc<dyn ClusterDatabase>> {
        self.inner
            .cluster_db
            .read()
            .clone()
            .ok_or_else(|| HiveError::not_initialized("cluster database"))
    }

    pub fn is_clustered(&self) -> bool {
        self.inner.clustered.load(Ordering::Acquire)
    }

    pub fn server_fingerprint(&self) -> Option<String> {
        self.inner
            .certificates
            .read()
            .as_ref()
            .map(|bundle| bundle.server.fingerprint().to_string())
    }

    pub fn certificates(&self) -> Option<CertificateBundle> {
        self.inner.certificates.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.inner.events.subscribe()
    }

    pub fn emit(&self, event: DaemonEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /// Ask the owner of the daemon to stop it. Returns false when a stop is
    /// already pending or in progress.
    pub fn request_shutdown(&self, signal: ShutdownSignal) -> bool {
        if self.inner.signals.is_shutting_down() {
            return false;
        }
        match self.inner.shutdown_requests.try_send(signal) {
            Ok(()) => {
                info!("Shutdown requested over the API");
                true
            }
            Err(_) => false,
        }
    }

    /// Rebuild the trusted certificate cache from the cluster database
    pub async fn refresh_certificate_cache(&self) -> HiveResult<usize> {
        let database = self.cluster_db()?;
        let count = self.inner.trust.refresh(database.as_ref()).await?;
        debug!(count, "Refreshed trusted certificate cache");
        self.emit(DaemonEvent::CertificatesRefreshed { count });
        Ok(count)
    }

    pub(crate) fn set_local_db(&self, database: Option<Arc<LocalDatabase>>) {
        *self.inner.local_db.write() = database;
    }

    pub(crate) fn set_cluster_db(&self, database: Option<Arc<dyn ClusterDatabase>>) {
        *self.inner.cluster_db.write() = database;
    }

    pub(crate) fn take_cluster_db(&self) -> Option<Arc<dyn ClusterDatabase>> {
        self.inner.cluster_db.write().take()
    }

    pub(crate) fn set_certificates(&self, bundle: CertificateBundle) {
        *self.inner.certificates.write() = Some(bundle);
    }

    pub(crate) fn set_clustered(&self, clustered: bool) {
        self.inner.clustered.store(clustered, Ordering::Release);
    }
}

impl std::fmt::Debug for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonState")
            .field("signals", &self.inner.signals)
            .field("clustered", &self.is_clustered())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockClusterDatabase;

    #[tokio::test]
    async fn test_shutdown_request_only_once() {
        let (state, mut rx) = DaemonState::new(DaemonConfig::default());
        assert!(state.request_shutdown(ShutdownSignal::Power));
        assert!(!state.request_shutdown(ShutdownSignal::Terminate));
        assert_eq!(rx.recv().await, Some(ShutdownSignal::Power));

        state.signals().shutdown.cancel();
        assert!(!state.request_shutdown(ShutdownSignal::Power));
    }

    #[tokio::test]
    async fn test_refresh_requires_cluster_database() {
        let (state, _rx) = DaemonState::new(DaemonConfig::default());
        assert!(state.refresh_certificate_cache().await.is_err());

        let mut events = state.subscribe();
        state.set_cluster_db(Some(Arc::new(MockClusterDatabase::default())));
        assert_eq!(state.refresh_certificate_cache().await.unwrap(), 0);
        assert_eq!(
            events.recv().await.unwrap(),
            DaemonEvent::CertificatesRefreshed { count: 0 }
        );
    }
}
