//! Ordered shutdown
//!
//! Which steps run depends on the signal: a power signal stops workloads,
//! networks and storage pools; a terminate signal leaves them running and
//! only quiesces the daemon itself. Teardown errors are collected and
//! reported together; none of them stops later steps from running.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    abstractions::{ClusterDatabase, ClusterGateway},
    error::{HiveError, HiveResult},
    lifecycle::{daemon::Daemon, os},
    types::{DaemonEvent, InstanceInfo},
};

/// Why the daemon is stopping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Host is going down: stop workloads too
    Power,
    /// Daemon restart: leave workloads running
    Terminate,
    Other(String),
}

impl ShutdownSignal {
    fn stops_workloads(&self) -> bool {
        matches!(self, ShutdownSignal::Power)
    }

    fn drains_daemon(&self) -> bool {
        matches!(self, ShutdownSignal::Power | ShutdownSignal::Terminate)
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Power => write!(f, "SIGPWR"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::Other(name) => write!(f, "{}", name),
        }
    }
}

impl Daemon {
    /// Stop the daemon. Safe to call more than once and after a partial
    /// start; only the first call does any work.
    pub async fn stop(&self, signal: ShutdownSignal) -> HiveResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Daemon already stopped");
            return Ok(());
        }

        info!(signal = %signal, "Stopping daemon");
        self.state.signals().shutdown.cancel();
        self.state.emit(DaemonEvent::ShuttingDown {
            signal: signal.to_string(),
        });

        let mut errors = Vec::new();
        let gateway = self.gateway.read().clone();

        if let Err(e) = self.cluster_tasks.stop(self.config.cluster.task_stop_grace).await {
            errors.push(e);
        }

        if self.state.is_clustered() {
            if let Some(gateway) = &gateway {
                if let Err(e) = gateway.handover_member_role().await {
                    warn!(error = %e, "Could not hand over member role");
                    gateway.kill().await;
                }
            }
        }

        let instances = self.local_instances(gateway.as_ref()).await;

        let timeout = self.shutdown_timeout().await;
        if signal.drains_daemon() {
            self.drain(timeout).await;
        }
        if signal.stops_workloads() {
            self.stop_workloads(instances.as_deref().unwrap_or_default(), timeout)
                .await;
        }

        if let Some(gateway) = &gateway {
            gateway.kill().await;
        }

        self.release_resources(gateway.as_ref(), &mut errors).await;

        if instances.is_some() {
            self.unmount_transient().await;
        }

        match HiveError::from_many("shutdown", errors) {
            Ok(()) => {
                info!("Daemon stopped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Daemon stopped with errors");
                Err(e)
            }
        }
    }

    /// Instances on this node. Uses the cluster database when it is open and
    /// falls back to the on-disk view, giving up on the cluster connection.
    async fn local_instances(
        &self,
        gateway: Option<&Arc<dyn ClusterGateway>>,
    ) -> Option<Vec<InstanceInfo>> {
        let instances = &self.collaborators.instances;
        if self.state.cluster_db().is_ok() {
            match instances.list_local().await {
                Ok(list) => return Some(list),
                Err(e) => warn!(error = %e, "Could not list instances from the cluster database"),
            }
        }

        if let Some(gateway) = gateway {
            gateway.kill().await;
        }
        if let Some(database) = self.state.take_cluster_db() {
            close_cluster_db(database.as_ref()).await;
        }

        match instances.list_on_disk().await {
            Ok(list) => Some(list),
            Err(e) => {
                warn!(error = %e, "Could not list instances on disk");
                None
            }
        }
    }

    async fn shutdown_timeout(&self) -> std::time::Duration {
        let default = self.config.shutdown.default_timeout;
        let Ok(database) = self.state.cluster_db() else {
            return default;
        };
        match database.settings().await {
            Ok(settings) => settings.shutdown_timeout_or(default),
            Err(e) => {
                debug!(error = %e, "Using default shutdown timeout");
                default
            }
        }
    }

    async fn drain(&self, timeout: std::time::Duration) {
        if let Err(e) = self.collaborators.operations.wait_all(timeout).await {
            warn!(error = %e, "Operations did not finish");
        }

        let ceiling = self.config.shutdown.storage_unmount_ceiling;
        match tokio::time::timeout(ceiling, self.collaborators.storage.unmount_daemon_volumes()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to unmount daemon storage volumes"),
            Err(_) => warn!(ceiling = ?ceiling, "Timed out unmounting daemon storage volumes"),
        }
    }

    async fn stop_workloads(&self, instances: &[InstanceInfo], timeout: std::time::Duration) {
        let collaborators = &self.collaborators;
        info!(count = instances.len(), "Stopping instances");
        if let Err(e) = collaborators.instances.shutdown(instances, timeout).await {
            warn!(error = %e, "Failed to stop instances");
        }
        if let Err(e) = collaborators.networks.shutdown().await {
            warn!(error = %e, "Failed to stop networks");
        }
        if let Err(e) = collaborators.storage.unmount_pools().await {
            warn!(error = %e, "Failed to unmount storage pools");
        }
    }

    async fn release_resources(
        &self,
        gateway: Option<&Arc<dyn ClusterGateway>>,
        errors: &mut Vec<HiveError>,
    ) {
        if let Err(e) = self.general_tasks.stop(self.config.cluster.task_stop_grace).await {
            errors.push(e);
        }

        if let Err(e) = self.collaborators.auxiliary.stop().await {
            errors.push(e);
        }

        if let Some(database) = self.state.take_cluster_db() {
            close_cluster_db(database.as_ref()).await;
        }

        if let Ok(local) = self.state.local_db() {
            self.state.set_local_db(None);
            if let Err(e) = local.close() {
                errors.push(e);
            }
        }

        if let Some(gateway) = gateway {
            if let Err(e) = gateway.shutdown().await {
                errors.push(e);
            }
        }

        if let Some(endpoints) = self.endpoints.lock().await.take() {
            if let Err(e) = endpoints.down().await {
                errors.push(e);
            }
        }
    }

    /// Detach the transient mounts once nothing runs on this node any more
    async fn unmount_transient(&self) {
        let instances = &self.collaborators.instances;
        match instances.list_on_disk().await {
            Ok(list) if list.iter().any(|i| i.running) => {
                debug!("Instances still running, keeping transient mounts");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Could not list instances, keeping transient mounts");
                return;
            }
        }

        for path in os::transient_mount_paths(self.config.var_dir()) {
            let Some(_handle) = os::open_scoped(&path) else {
                continue;
            };
            if let Err(e) = self.collaborators.mounts.unmount_detached(&path) {
                debug!(path = %path.display(), error = %e, "Failed to unmount");
            }
        }
    }
}

/// Errors closing the replicated database are expected when the cluster is
/// already gone
async fn close_cluster_db(database: &dyn ClusterDatabase) {
    if let Err(e) = database.close().await {
        debug!(error = %e, "Error closing cluster database");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::power(ShutdownSignal::Power, "SIGPWR", true, true)]
    #[case::terminate(ShutdownSignal::Terminate, "SIGTERM", false, true)]
    #[case::interrupt(ShutdownSignal::Other("SIGINT".into()), "SIGINT", false, false)]
    #[case::quit(ShutdownSignal::Other("SIGQUIT".into()), "SIGQUIT", false, false)]
    fn test_signal_behaviour(
        #[case] signal: ShutdownSignal,
        #[case] name: &str,
        #[case] stops_workloads: bool,
        #[case] drains: bool,
    ) {
        assert_eq!(signal.to_string(), name);
        assert_eq!(signal.stops_workloads(), stops_workloads);
        assert_eq!(signal.drains_daemon(), drains);
    }
}
