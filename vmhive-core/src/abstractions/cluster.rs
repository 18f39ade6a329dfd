//! Replicated database and consensus gateway interfaces

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::ClusterSettings,
    error::HiveResult,
    types::{ClusterMember, HeartbeatSnapshot, TrustedCertificate},
};

/// Connection to the consensus layer that backs the replicated database
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Open the replicated database.
    ///
    /// Fails with [`HiveError::SomeNodesBehind`](crate::error::HiveError::SomeNodesBehind)
    /// when peers run an older schema or API version.
    async fn open_database(&self, timeout: Duration) -> HiveResult<Arc<dyn ClusterDatabase>>;

    /// Block until a peer announces that a rolling upgrade finished
    async fn wait_upgrade_notification(&self);

    /// Run one heartbeat round. Only the leader does real work here.
    async fn heartbeat_round(&self) -> HiveResult<()>;

    /// Tell peers this member considers the upgrade complete
    async fn notify_upgrade_completed(&self) -> HiveResult<()>;

    /// Register the receiver of heartbeat snapshots
    fn subscribe_heartbeats(&self, handler: Arc<dyn HeartbeatHandler>);

    /// Transfer this member's consensus role to another member
    async fn handover_member_role(&self) -> HiveResult<()>;

    /// Abandon the consensus role immediately
    async fn kill(&self);

    async fn shutdown(&self) -> HiveResult<()>;
}

/// Receiver of heartbeat snapshots delivered by the gateway
#[async_trait]
pub trait HeartbeatHandler: Send + Sync {
    async fn on_heartbeat(
        &self,
        snapshot: HeartbeatSnapshot,
        is_leader: bool,
        unavailable_members: Vec<String>,
    );
}

/// Handle to the opened replicated database
#[async_trait]
pub trait ClusterDatabase: Send + Sync {
    /// This member's id, `None` until it is a confirmed cluster member
    async fn node_id(&self) -> HiveResult<Option<u64>>;

    async fn settings(&self) -> HiveResult<ClusterSettings>;

    async fn trusted_certificates(&self) -> HiveResult<Vec<TrustedCertificate>>;

    /// Whether this member was evacuated and must not restore workloads
    async fn local_member_evacuated(&self) -> HiveResult<bool>;

    async fn close(&self) -> HiveResult<()>;
}

/// Membership mutations triggered by the heartbeat coordinator
#[async_trait]
pub trait MembershipOps: Send + Sync {
    /// Check whether a schema or data migration is due after a version change
    async fn maybe_update(&self) -> HiveResult<()>;

    /// Refresh name resolution state tied to the member list
    async fn refresh_service_discovery(&self, members: &[ClusterMember]) -> HiveResult<()>;

    /// Promote or demote members to reach the target voter and standby counts
    async fn rebalance_roles(&self, unavailable_members: &[String]) -> HiveResult<()>;

    /// Assign consensus identities to members that do not have one yet
    async fn upgrade_members_without_raft_role(&self) -> HiveResult<()>;
}
