//! The daemon object
//!
//! [`Daemon`] owns every piece of mutable control-plane state for one
//! process lifetime: it is constructed explicitly, started once and stopped
//! once. Collaborators plug in through [`Collaborators`].

use axum::Router;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{
    abstractions::{
        AuthorizationService, AuxiliaryListeners, ClusterGateway, ExternalAuthenticator, Inert,
        InstanceManager, MembershipOps, NetworkManager, OperationTracker, StorageManager,
        TransientMounts,
    },
    api::Endpoint,
    cluster::{BootstrapState, HeartbeatCoordinator},
    config::DaemonConfig,
    endpoints::Endpoints,
    lifecycle::{os::Capabilities, shutdown::ShutdownSignal, state::DaemonState},
    tasks::{ScheduledTask, TaskGroup},
};

/// Everything the daemon drives but does not implement
pub struct Collaborators {
    /// Consensus gateway. Without one the node runs standalone on its local
    /// database; a clustered node must provide it.
    pub gateway: Option<Arc<dyn ClusterGateway>>,
    pub membership: Option<Arc<dyn MembershipOps>>,
    pub instances: Arc<dyn InstanceManager>,
    pub storage: Arc<dyn StorageManager>,
    pub networks: Arc<dyn NetworkManager>,
    pub operations: Arc<dyn OperationTracker>,
    pub auxiliary: Arc<dyn AuxiliaryListeners>,
    pub mounts: Arc<dyn TransientMounts>,
    pub external_auth: Option<Arc<dyn ExternalAuthenticator>>,
    pub authorization: Option<Arc<dyn AuthorizationService>>,
    /// Resource routes, gated exactly like the built-in ones
    pub endpoints: Vec<Endpoint>,
    /// Routes answered on the guest socket before falling back to the main API
    pub guest_routes: Option<Router>,
    /// Extra jobs for the general task group
    pub maintenance: Vec<ScheduledTask>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            gateway: None,
            membership: None,
            instances: Arc::new(Inert),
            storage: Arc::new(Inert),
            networks: Arc::new(Inert),
            operations: Arc::new(Inert),
            auxiliary: Arc::new(Inert),
            mounts: Arc::new(crate::lifecycle::os::LinuxTransientMounts),
            external_auth: None,
            authorization: None,
            endpoints: Vec::new(),
            guest_routes: None,
            maintenance: Vec::new(),
        }
    }
}

pub struct Daemon {
    pub(crate) config: DaemonConfig,
    pub(crate) state: DaemonState,
    pub(crate) collaborators: Collaborators,
    pub(crate) shutdown_requests: tokio::sync::Mutex<mpsc::Receiver<ShutdownSignal>>,
    pub(crate) gateway: RwLock<Option<Arc<dyn ClusterGateway>>>,
    pub(crate) heartbeat: RwLock<Option<Arc<HeartbeatCoordinator>>>,
    pub(crate) bootstrap_state: RwLock<Option<tokio::sync::watch::Receiver<BootstrapState>>>,
    pub(crate) endpoints: tokio::sync::Mutex<Option<Endpoints>>,
    pub(crate) capabilities: RwLock<Option<Capabilities>>,
    pub(crate) general_tasks: TaskGroup,
    pub(crate) cluster_tasks: TaskGroup,
    pub(crate) started: AtomicBool,
    pub(crate) stopped: AtomicBool,
    pub(crate) maintenance: Mutex<Vec<ScheduledTask>>,
}

impl Daemon {
    pub fn new(config: DaemonConfig, mut collaborators: Collaborators) -> Self {
        let (state, shutdown_requests) = DaemonState::new(config.clone());
        let maintenance = std::mem::take(&mut collaborators.maintenance);

        Self {
            config,
            state,
            collaborators,
            shutdown_requests: tokio::sync::Mutex::new(shutdown_requests),
            gateway: RwLock::new(None),
            heartbeat: RwLock::new(None),
            bootstrap_state: RwLock::new(None),
            endpoints: tokio::sync::Mutex::new(None),
            capabilities: RwLock::new(None),
            general_tasks: TaskGroup::new("general"),
            cluster_tasks: TaskGroup::new("cluster"),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            maintenance: Mutex::new(maintenance),
        }
    }

    /// Handle given to collaborators
    pub fn state(&self) -> DaemonState {
        self.state.clone()
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.capabilities.read().clone()
    }

    /// Progress of the cluster database bootstrap, once it has begun
    pub fn bootstrap_state(&self) -> Option<BootstrapState> {
        self.bootstrap_state.read().as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn heartbeat_coordinator(&self) -> Option<Arc<HeartbeatCoordinator>> {
        self.heartbeat.read().clone()
    }

    pub fn is_clustered(&self) -> bool {
        self.state.is_clustered()
    }

    pub fn cluster_tasks_running(&self) -> bool {
        self.cluster_tasks.is_running()
    }

    pub fn general_tasks_running(&self) -> bool {
        self.general_tasks.is_running()
    }

    /// Bound HTTPS address while the listeners are up
    pub async fn https_address(&self) -> Option<std::net::SocketAddr> {
        self.endpoints.lock().await.as_ref().and_then(|e| e.https_address())
    }

    /// Wait for a stop requested over the API
    pub async fn shutdown_requested(&self) -> Option<ShutdownSignal> {
        self.shutdown_requests.lock().await.recv().await
    }
}
