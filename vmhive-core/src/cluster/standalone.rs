//! Single-node stand-ins for the replicated database
//!
//! A node that has never joined a cluster still needs a database for
//! cluster-wide settings and trusted certificates. These types serve both
//! from the local database; the node is always its own leader and never
//! sees version skew.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{
    abstractions::{ClusterDatabase, ClusterGateway, HeartbeatHandler, MembershipOps},
    cluster::{API_EXTENSIONS, SCHEMA_VERSION},
    config::ClusterSettings,
    error::HiveResult,
    storage::{local::KEY_HTTPS_ADDRESS, LocalDatabase},
    types::{
        ClusterMember, ClusterVersion, HeartbeatSnapshot, RaftRole, TrustedCertificate,
    },
};

/// Node-local key marking this member as evacuated
pub const KEY_EVACUATED: &str = "cluster.evacuated";

const STANDALONE_NODE_ID: u64 = 1;

pub struct LocalClusterDatabase {
    local: Arc<LocalDatabase>,
}

impl LocalClusterDatabase {
    pub fn new(local: Arc<LocalDatabase>) -> Self {
        Self { local }
    }
}

#[async_trait]
impl ClusterDatabase for LocalClusterDatabase {
    async fn node_id(&self) -> HiveResult<Option<u64>> {
        Ok(Some(STANDALONE_NODE_ID))
    }

    async fn settings(&self) -> HiveResult<ClusterSettings> {
        ClusterSettings::from_map(&self.local.cluster_config()?)
    }

    async fn trusted_certificates(&self) -> HiveResult<Vec<TrustedCertificate>> {
        self.local.certificates()
    }

    async fn local_member_evacuated(&self) -> HiveResult<bool> {
        Ok(self.local.config_get(KEY_EVACUATED)?.as_deref() == Some("true"))
    }

    async fn close(&self) -> HiveResult<()> {
        // The local database is closed separately by the lifecycle manager
        Ok(())
    }
}

pub struct StandaloneGateway {
    local: Arc<LocalDatabase>,
    handler: RwLock<Option<Arc<dyn HeartbeatHandler>>>,
}

impl StandaloneGateway {
    pub fn new(local: Arc<LocalDatabase>) -> Self {
        Self {
            local,
            handler: RwLock::new(None),
        }
    }

    fn snapshot(&self) -> HiveResult<HeartbeatSnapshot> {
        let address = self.local.config_get(KEY_HTTPS_ADDRESS)?.unwrap_or_default();
        let member = ClusterMember {
            id: STANDALONE_NODE_ID,
            address,
            raft_id: STANDALONE_NODE_ID,
            raft_role: RaftRole::Voter,
            online: true,
            last_heartbeat: Utc::now(),
            api_extensions: API_EXTENSIONS,
            schema_version: SCHEMA_VERSION,
        };

        Ok(HeartbeatSnapshot {
            members: BTreeMap::from([(member.id, member)]),
            full_state_list: true,
            version: ClusterVersion {
                schema: SCHEMA_VERSION,
                api_extensions: API_EXTENSIONS,
            },
        })
    }
}

#[async_trait]
impl ClusterGateway for StandaloneGateway {
    async fn open_database(&self, _timeout: Duration) -> HiveResult<Arc<dyn ClusterDatabase>> {
        Ok(Arc::new(LocalClusterDatabase::new(self.local.clone())))
    }

    async fn wait_upgrade_notification(&self) {
        // Nobody else can complete an upgrade for a single node
        futures::future::pending::<()>().await
    }

    async fn heartbeat_round(&self) -> HiveResult<()> {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler.on_heartbeat(self.snapshot()?, true, Vec::new()).await;
        }
        Ok(())
    }

    async fn notify_upgrade_completed(&self) -> HiveResult<()> {
        Ok(())
    }

    fn subscribe_heartbeats(&self, handler: Arc<dyn HeartbeatHandler>) {
        *self.handler.write() = Some(handler);
    }

    async fn handover_member_role(&self) -> HiveResult<()> {
        Ok(())
    }

    async fn kill(&self) {
        debug!("Standalone gateway has no consensus role to abandon");
    }

    async fn shutdown(&self) -> HiveResult<()> {
        self.handler.write().take();
        Ok(())
    }
}

/// Membership operations for a node with no peers
pub struct StandaloneMembership;

#[async_trait]
impl MembershipOps for StandaloneMembership {
    async fn maybe_update(&self) -> HiveResult<()> {
        Ok(())
    }

    async fn refresh_service_discovery(&self, _members: &[ClusterMember]) -> HiveResult<()> {
        Ok(())
    }

    async fn rebalance_roles(&self, _unavailable_members: &[String]) -> HiveResult<()> {
        Ok(())
    }

    async fn upgrade_members_without_raft_role(&self) -> HiveResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::cluster::KEY_MAX_VOTERS;
    use tempfile::TempDir;

    fn local() -> (TempDir, Arc<LocalDatabase>) {
        let dir = TempDir::new().unwrap();
        let db = LocalDatabase::open(&dir.path().join("local.redb")).unwrap();
        (dir, Arc::new(db))
    }

    #[tokio::test]
    async fn test_settings_come_from_local_cluster_config() {
        let (_dir, local) = local();
        local.cluster_config_set(KEY_MAX_VOTERS, "5").unwrap();
        let gateway = StandaloneGateway::new(local.clone());

        let database = gateway.open_database(Duration::from_secs(1)).await.unwrap();
        assert_eq!(database.settings().await.unwrap().max_voters, 5);
        assert_eq!(database.node_id().await.unwrap(), Some(1));
        assert!(!database.local_member_evacuated().await.unwrap());

        local.config_set(KEY_EVACUATED, "true").unwrap();
        assert!(database.local_member_evacuated().await.unwrap());
    }

    #[tokio::test]
    async fn test_heartbeat_round_reaches_subscriber() {
        let (_dir, local) = local();
        let gateway = StandaloneGateway::new(local);
        let recorder = Arc::new(crate::test_helpers::RecordingHeartbeats::default());
        gateway.subscribe_heartbeats(recorder.clone());

        gateway.heartbeat_round().await.unwrap();
        let seen = recorder.snapshots();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].full_state_list);
        assert_eq!(seen[0].members.len(), 1);
    }
}
