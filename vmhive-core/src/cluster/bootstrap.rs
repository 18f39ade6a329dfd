//! Replicated database bootstrap
//!
//! Opening the cluster database can fail because some members still run an
//! older schema during a rolling upgrade. That case is not fatal: the member
//! keeps taking part in heartbeats from a throwaway task group, waits for an
//! upgrade-complete notification, then retries. Progress is published as a
//! [`BootstrapState`] so the degraded phase is observable.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    abstractions::{ClusterDatabase, ClusterGateway},
    error::{HiveError, HiveResult},
    tasks::{Schedule, ScheduledTask, TaskGroup},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    Opening { attempt: u32 },
    /// Heartbeat-only mode while peers catch up
    DegradedWait { attempt: u32 },
    Open,
    Failed(String),
}

pub struct ClusterDatabaseBootstrapper {
    gateway: Arc<dyn ClusterGateway>,
    connect_timeout: Duration,
    heartbeat_interval: Duration,
    degraded_stop_grace: Duration,
    state: watch::Sender<BootstrapState>,
}

impl ClusterDatabaseBootstrapper {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        connect_timeout: Duration,
        heartbeat_interval: Duration,
        degraded_stop_grace: Duration,
    ) -> Self {
        let (state, _) = watch::channel(BootstrapState::Opening { attempt: 0 });
        Self {
            gateway,
            connect_timeout,
            heartbeat_interval,
            degraded_stop_grace,
            state,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    fn transition(&self, next: BootstrapState) {
        self.state.send_replace(next);
    }

    /// Open the database, waiting out version skew. Only shutdown or a
    /// non-skew failure ends the loop without a database.
    pub async fn run(&self, shutdown: &CancellationToken) -> HiveResult<Arc<dyn ClusterDatabase>> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.transition(BootstrapState::Opening { attempt });
            info!(attempt, timeout = ?self.connect_timeout, "Opening cluster database");

            let result = tokio::select! {
                result = self.gateway.open_database(self.connect_timeout) => result,
                _ = shutdown.cancelled() => Err(HiveError::cancelled("opening cluster database")),
            };

            match result {
                Ok(database) => {
                    self.transition(BootstrapState::Open);
                    if let Err(e) = self.gateway.notify_upgrade_completed().await {
                        warn!(error = %e, "Could not notify all members about completed upgrade");
                    }
                    return Ok(database);
                }
                Err(e) if e.is_some_nodes_behind() => {
                    warn!(error = %e, "Some members are behind, waiting for upgrade notification");
                    self.transition(BootstrapState::DegradedWait { attempt });
                    self.degraded_wait(shutdown).await?;
                }
                Err(e) => {
                    self.transition(BootstrapState::Failed(e.to_string()));
                    return Err(e);
                }
            }
        }
    }

    async fn degraded_wait(&self, shutdown: &CancellationToken) -> HiveResult<()> {
        let heartbeat = TaskGroup::new("degraded-heartbeat");
        let gateway = self.gateway.clone();
        heartbeat.add(ScheduledTask::new(
            "heartbeat",
            Schedule::every(self.heartbeat_interval),
            move |_token| {
                let gateway = gateway.clone();
                async move {
                    if let Err(e) = gateway.heartbeat_round().await {
                        warn!(error = %e, "Heartbeat round failed in degraded mode");
                    }
                }
            },
        ));
        heartbeat.start(shutdown);

        let notified = tokio::select! {
            _ = self.gateway.wait_upgrade_notification() => true,
            _ = shutdown.cancelled() => false,
        };

        if let Err(e) = heartbeat.stop(self.degraded_stop_grace).await {
            warn!(error = %e, "Degraded heartbeat did not stop in time");
        }

        if notified {
            info!("Upgrade notification received, retrying");
            Ok(())
        } else {
            let err = HiveError::cancelled("waiting for cluster upgrade");
            self.transition(BootstrapState::Failed(err.to_string()));
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockGateway;

    #[tokio::test]
    async fn test_opens_first_try() {
        let gateway = Arc::new(MockGateway::default());
        let bootstrapper = ClusterDatabaseBootstrapper::new(
            gateway.clone(),
            Duration::from_secs(1),
            Duration::from_secs(10),
            Duration::from_secs(1),
        );

        bootstrapper.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(bootstrapper.state(), BootstrapState::Open);
        assert_eq!(gateway.open_attempts(), 1);
        assert_eq!(gateway.upgrade_notifications_sent(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_are_fatal() {
        let gateway = Arc::new(MockGateway::default());
        gateway.script_open(vec![Err(HiveError::internal("disk on fire"))]);
        let bootstrapper = ClusterDatabaseBootstrapper::new(
            gateway.clone(),
            Duration::from_secs(1),
            Duration::from_secs(10),
            Duration::from_secs(1),
        );

        assert!(bootstrapper.run(&CancellationToken::new()).await.is_err());
        assert!(matches!(bootstrapper.state(), BootstrapState::Failed(_)));
        assert_eq!(gateway.open_attempts(), 1);
    }

    #[tokio::test]
    async fn test_notify_failure_is_not_fatal() {
        let gateway = Arc::new(MockGateway::default());
        gateway.fail_upgrade_notify(true);
        let bootstrapper = ClusterDatabaseBootstrapper::new(
            gateway,
            Duration::from_secs(1),
            Duration::from_secs(10),
            Duration::from_secs(1),
        );

        assert!(bootstrapper.run(&CancellationToken::new()).await.is_ok());
    }
}
