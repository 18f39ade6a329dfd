//! Ordered startup
//!
//! local database, capabilities, certificates, local trust, cluster mode,
//! replicated database, listeners, storage and networks, cluster settings,
//! external auth, auxiliary listeners, setup-complete, workload restore,
//! task groups, ready.
//!
//! A failing step aborts the rest and runs the stop sequence as rollback.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    abstractions::{ClusterGateway, MembershipOps},
    api::{self, builtin_endpoints},
    certs::CertificateBundle,
    cluster::{ClusterDatabaseBootstrapper, HeartbeatCoordinator, StandaloneGateway, StandaloneMembership},
    config::ClusterSettings,
    endpoints::{EndpointSettings, Endpoints},
    error::{HiveError, HiveResult},
    lifecycle::{daemon::Daemon, os, shutdown::ShutdownSignal},
    security::CaPolicy,
    storage::{local::KEY_HTTPS_ADDRESS, LocalDatabase},
    tasks::{Schedule, ScheduledTask},
    types::DaemonEvent,
};

const LOCAL_DATABASE_PATH: &str = "database/local.redb";

impl Daemon {
    /// Start the daemon. On failure everything already started is stopped
    /// again and the original error is returned.
    pub async fn start(&self) -> HiveResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(HiveError::internal("daemon already started"));
        }

        info!(var_dir = %self.config.var_dir().display(), "Starting daemon");
        match self.start_sequence().await {
            Ok(()) => {
                info!("Daemon started");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to start the daemon");
                if let Err(stop_err) = self.stop(ShutdownSignal::Other("startup failure".into())).await {
                    warn!(error = %stop_err, "Rollback after failed start was incomplete");
                }
                Err(e)
            }
        }
    }

    async fn start_sequence(&self) -> HiveResult<()> {
        let shutdown = self.state.signals().shutdown.clone();
        let var_dir = self.config.var_dir().to_path_buf();

        let local = Arc::new(LocalDatabase::open(&var_dir.join(LOCAL_DATABASE_PATH))?);
        self.state.set_local_db(Some(local.clone()));

        *self.capabilities.write() = Some(os::detect());

        let certificates = CertificateBundle::load(&var_dir).await?;
        self.state.set_certificates(certificates.clone());

        let local_trust = local.certificates()?;
        info!(count = local_trust.len(), "Loaded locally trusted certificates");
        self.state.trust_store().replace(local_trust);

        let clustered = local.is_clustered()?;
        self.state.set_clustered(clustered);
        info!(clustered, "Determined cluster mode");

        let (gateway, membership) = self.select_gateway(clustered, &local)?;
        *self.gateway.write() = Some(gateway.clone());

        let coordinator = Arc::new(HeartbeatCoordinator::new(self.state.clone(), membership));
        gateway.subscribe_heartbeats(coordinator.clone());
        *self.heartbeat.write() = Some(coordinator);

        let bootstrapper = ClusterDatabaseBootstrapper::new(
            gateway.clone(),
            self.config.connect_timeout(clustered),
            self.config.cluster.heartbeat_interval,
            self.config.cluster.degraded_stop_grace,
        );
        *self.bootstrap_state.write() = Some(bootstrapper.subscribe());
        let database = bootstrapper.run(&shutdown).await?;
        self.state.set_cluster_db(Some(database.clone()));

        self.start_endpoints(&local, &certificates).await?;

        self.collaborators.storage.startup().await?;
        self.collaborators.networks.startup().await?;

        let settings = database.settings().await?;
        self.state.auth().set_ca_policy(CaPolicy {
            trust_ca_certificates: settings.trust_ca_certificates,
            ca: certificates.ca.clone(),
        });
        self.state.refresh_certificate_cache().await?;

        self.configure_external_services(&settings).await?;
        self.start_auxiliary(&settings).await?;

        self.state.signals().setup_complete.fire();
        self.state.emit(DaemonEvent::SetupComplete);
        info!("Setup complete");

        if database.local_member_evacuated().await? {
            info!("Member is evacuated, not restoring instances");
        } else {
            self.collaborators.instances.restore().await?;
        }

        self.start_tasks(clustered, gateway);

        self.state.signals().ready.fire();
        self.state.emit(DaemonEvent::Ready);
        Ok(())
    }

    fn select_gateway(
        &self,
        clustered: bool,
        local: &Arc<LocalDatabase>,
    ) -> HiveResult<(Arc<dyn ClusterGateway>, Arc<dyn MembershipOps>)> {
        let membership = self
            .collaborators
            .membership
            .clone()
            .unwrap_or_else(|| Arc::new(StandaloneMembership));

        match (&self.collaborators.gateway, clustered) {
            (Some(gateway), _) => Ok((gateway.clone(), membership)),
            (None, false) => Ok((Arc::new(StandaloneGateway::new(local.clone())), membership)),
            (None, true) => Err(HiveError::configuration(
                "cluster",
                "node is clustered but no cluster gateway was provided",
            )),
        }
    }

    async fn start_endpoints(
        &self,
        local: &LocalDatabase,
        certificates: &CertificateBundle,
    ) -> HiveResult<()> {
        let https_address = match local.config_get(KEY_HTTPS_ADDRESS)? {
            Some(address) if !address.is_empty() => Some(address.parse().map_err(|e| {
                HiveError::configuration(
                    KEY_HTTPS_ADDRESS,
                    format!("invalid address '{}': {}", address, e),
                )
            })?),
            _ => self.config.endpoints.https_address,
        };

        let settings = EndpointSettings {
            unix_socket: self.config.unix_socket_path(),
            guest_socket: self.config.guest_socket_path(),
            socket_group: self.config.daemon.socket_group.clone(),
            https_address,
        };

        let mut routes = builtin_endpoints();
        routes.extend(self.collaborators.endpoints.iter().cloned());
        let main = api::router(self.state.clone(), routes);
        let guest = match &self.collaborators.guest_routes {
            Some(guest) => guest.clone().fallback_service(main.clone()),
            None => main.clone(),
        };

        let endpoints = Endpoints::up(&settings, main, guest, &certificates.network).await?;
        *self.endpoints.lock().await = Some(endpoints);
        Ok(())
    }

    async fn configure_external_services(&self, settings: &ClusterSettings) -> HiveResult<()> {
        let Some(external) = &settings.external_auth else {
            self.state.auth().set_external(None);
            self.state.access().set_authorization(None);
            return Ok(());
        };

        let Some(service) = self.collaborators.external_auth.clone() else {
            warn!(endpoint = %external.endpoint, "External authentication configured but no service is available");
            return Ok(());
        };

        service.configure(external).await?;
        self.state
            .auth()
            .set_external(Some((service, external.domains.clone())));
        info!(endpoint = %external.endpoint, domains = ?external.domains, "Enabled external authentication");

        // Role-based access only makes sense for identities from the external service
        if let (Some(url), Some(authorization)) =
            (&settings.rbac_api_url, self.collaborators.authorization.clone())
        {
            authorization.configure(url).await?;
            self.state.access().set_authorization(Some(authorization));
            info!(url = %url, "Enabled role-based access control");
        }
        Ok(())
    }

    async fn start_auxiliary(&self, settings: &ClusterSettings) -> HiveResult<()> {
        if let Some(address) = &settings.bgp_address {
            self.collaborators.auxiliary.start_bgp(address).await?;
            info!(address = %address, "Started BGP listener");
        }
        if let Some(address) = &settings.dns_address {
            self.collaborators.auxiliary.start_dns(address).await?;
            info!(address = %address, "Started DNS listener");
        }
        Ok(())
    }

    fn start_tasks(&self, clustered: bool, gateway: Arc<dyn ClusterGateway>) {
        let shutdown = self.state.signals().shutdown.clone();

        let state = self.state.clone();
        self.general_tasks.add(ScheduledTask::new(
            "certificate-refresh",
            Schedule::Every {
                period: self.config.cluster.certificate_refresh_interval,
                skip_first: true,
            },
            move |_token| {
                let state = state.clone();
                async move {
                    if let Err(e) = state.refresh_certificate_cache().await {
                        warn!(error = %e, "Periodic certificate cache refresh failed");
                    }
                }
            },
        ));
        for task in self.maintenance.lock().drain(..) {
            self.general_tasks.add(task);
        }
        self.general_tasks.start(&shutdown);

        if clustered {
            self.cluster_tasks.add(ScheduledTask::new(
                "heartbeat",
                Schedule::every(self.config.cluster.heartbeat_interval),
                move |_token| {
                    let gateway = gateway.clone();
                    async move {
                        if let Err(e) = gateway.heartbeat_round().await {
                            warn!(error = %e, "Heartbeat round failed");
                        }
                    }
                },
            ));
            self.cluster_tasks.start(&shutdown);
        }
    }
}
