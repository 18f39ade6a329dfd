//! Heartbeat-driven membership tracking
//!
//! Every member receives the leader's snapshot on each tick. All members
//! keep their membership view and dependent caches current; only the leader
//! rebalances consensus roles.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use crate::{
    abstractions::{HeartbeatHandler, MembershipOps},
    error::{HiveError, HiveResult},
    lifecycle::DaemonState,
    observability::heartbeat_span,
    types::{ClusterMember, ClusterVersion, DaemonEvent, HeartbeatSnapshot, RaftRole},
};

/// What a single tick did, mostly for tests and logs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// This node has no member id yet
    pub skipped: bool,
    pub version_changed: bool,
    pub members_changed: bool,
    /// An offline voter or standby was excluded
    pub degraded: bool,
    pub rebalanced: bool,
    pub upgraded_raft_roles: bool,
}

#[derive(Debug, Default)]
struct MembershipView {
    last_version: Option<ClusterVersion>,
    /// Online members of the last full snapshot that was processed successfully
    last_members: Option<BTreeMap<u64, ClusterMember>>,
}

pub struct HeartbeatCoordinator {
    state: DaemonState,
    ops: Arc<dyn MembershipOps>,
    view: Mutex<MembershipView>,
}

impl HeartbeatCoordinator {
    pub fn new(state: DaemonState, ops: Arc<dyn MembershipOps>) -> Self {
        Self {
            state,
            ops,
            view: Mutex::new(MembershipView::default()),
        }
    }

    /// Member list of the last processed full snapshot
    pub fn last_members(&self) -> Option<BTreeMap<u64, ClusterMember>> {
        self.view.lock().last_members.clone()
    }

    /// Process one snapshot. Errors abort the tick and are retried on the next one.
    pub async fn handle(
        &self,
        snapshot: &HeartbeatSnapshot,
        is_leader: bool,
        unavailable_members: &[String],
    ) -> HiveResult<HeartbeatReport> {
        let mut report = HeartbeatReport::default();

        let node_id = match self.state.cluster_db() {
            Ok(database) => database.node_id().await?,
            Err(_) => None,
        };
        if node_id.map_or(true, |id| id == 0) {
            report.skipped = true;
            return Ok(report);
        }

        let last_version = self.view.lock().last_version;
        if last_version != Some(snapshot.version) {
            report.version_changed = true;
            self.ops.maybe_update().await.map_err(|e| {
                HiveError::ClusterError(format!("version check failed: {}", e))
            })?;
            self.view.lock().last_version = Some(snapshot.version);
        }

        if !snapshot.full_state_list {
            debug!("Ignoring partial heartbeat snapshot");
            return Ok(report);
        }

        let mut live = BTreeMap::new();
        let mut voters = 0usize;
        let mut standbys = 0usize;
        let mut missing_raft_id = false;

        for (id, member) in &snapshot.members {
            if member.online {
                live.insert(*id, member.clone());
            } else {
                warn!(
                    member_id = member.id,
                    address = %member.address,
                    raft_id = member.raft_id,
                    last_heartbeat = %member.last_heartbeat,
                    "Excluding offline member from refresh"
                );
                if member.raft_role != RaftRole::Spare {
                    report.degraded = true;
                }
            }
            match member.raft_role {
                RaftRole::Voter => voters += 1,
                RaftRole::Standby => standbys += 1,
                RaftRole::Spare => {}
            }
            if member.raft_id == 0 {
                missing_raft_id = true;
            }
        }

        let changed = {
            let view = self.view.lock();
            has_member_list_changed(view.last_members.as_ref(), &live)
        };
        if changed {
            debug!(members = live.len(), "Member list has changed");
            self.state.refresh_certificate_cache().await?;
            let members: Vec<ClusterMember> = live.values().cloned().collect();
            self.ops.refresh_service_discovery(&members).await?;
            self.state.emit(DaemonEvent::MembershipChanged {
                members: live.len(),
            });
            report.members_changed = true;
        }

        let live_count = live.len();
        self.view.lock().last_members = Some(live);

        if !is_leader || live_count <= 2 {
            return Ok(report);
        }

        let settings = self.state.cluster_db()?.settings().await?;
        let needs_rebalance = report.degraded
            || voters < settings.max_voters
            || standbys < settings.max_standby;
        if !needs_rebalance && !missing_raft_id {
            return Ok(report);
        }

        let lock = self.state.membership_lock();
        let _guard = lock.lock().await;

        if needs_rebalance {
            info!(voters, standbys, degraded = report.degraded, "Rebalancing member roles in heartbeat");
            match self.ops.rebalance_roles(unavailable_members).await {
                Ok(()) => report.rebalanced = true,
                Err(e) if e.is_not_leader() => {}
                Err(e) => warn!(error = %e, "Could not rebalance cluster member roles"),
            }
        }

        if missing_raft_id {
            info!("Upgrading members without raft role in heartbeat");
            match self.ops.upgrade_members_without_raft_role().await {
                Ok(()) => report.upgraded_raft_roles = true,
                Err(e) if e.is_not_leader() => {}
                Err(e) => warn!(error = %e, "Failed to upgrade raft roles"),
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl HeartbeatHandler for HeartbeatCoordinator {
    async fn on_heartbeat(
        &self,
        snapshot: HeartbeatSnapshot,
        is_leader: bool,
        unavailable_members: Vec<String>,
    ) {
        let span = heartbeat_span(snapshot.members.len(), is_leader);
        async {
            if let Err(e) = self.handle(&snapshot, is_leader, &unavailable_members).await {
                warn!(error = %e, "Heartbeat processing failed, retrying next tick");
            }
        }
        .instrument(span)
        .await
    }
}

/// Whether `next` differs from `previous` in member count or any known member's address
pub fn has_member_list_changed(
    previous: Option<&BTreeMap<u64, ClusterMember>>,
    next: &BTreeMap<u64, ClusterMember>,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    if previous.len() != next.len() {
        return true;
    }

    previous.iter().any(|(id, member)| {
        next.get(id)
            .map_or(true, |current| current.address != member.address)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::member;
    use rstest::rstest;

    fn members(entries: &[(u64, &str)]) -> BTreeMap<u64, ClusterMember> {
        entries
            .iter()
            .map(|(id, address)| (*id, member(*id, address, RaftRole::Voter, true)))
            .collect()
    }

    #[test]
    fn test_first_list_is_a_change() {
        assert!(has_member_list_changed(None, &members(&[(1, "10.0.0.1:8443")])));
    }

    #[rstest]
    #[case::identical(&[(1, "10.0.0.1:8443"), (2, "10.0.0.2:8443")], false)]
    #[case::address_changed(&[(1, "10.0.0.1:8443"), (2, "10.0.0.20:8443")], true)]
    #[case::member_left(&[(1, "10.0.0.1:8443")], true)]
    #[case::member_joined(&[(1, "10.0.0.1:8443"), (2, "10.0.0.2:8443"), (3, "10.0.0.3:8443")], true)]
    #[case::member_replaced(&[(1, "10.0.0.1:8443"), (3, "10.0.0.2:8443")], true)]
    fn test_member_list_changes(#[case] next: &[(u64, &str)], #[case] changed: bool) {
        let previous = members(&[(1, "10.0.0.1:8443"), (2, "10.0.0.2:8443")]);
        assert_eq!(has_member_list_changed(Some(&previous), &members(next)), changed);
    }

    #[test]
    fn test_heartbeat_fields_do_not_count() {
        let a = members(&[(1, "10.0.0.1:8443")]);
        let mut b = a.clone();
        if let Some(m) = b.get_mut(&1) {
            m.last_heartbeat = m.last_heartbeat + chrono::Duration::seconds(10);
            m.raft_role = RaftRole::Standby;
        }
        assert!(!has_member_list_changed(Some(&a), &b));
    }
}
