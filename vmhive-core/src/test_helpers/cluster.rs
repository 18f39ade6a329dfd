use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::EventLog;
use crate::{
    abstractions::{ClusterDatabase, ClusterGateway, HeartbeatHandler, MembershipOps},
    config::ClusterSettings,
    error::{HiveError, HiveResult},
    types::{ClusterMember, HeartbeatSnapshot, TrustedCertificate},
};

/// Gateway whose open results are scripted. An empty script means success.
#[derive(Default)]
pub struct MockGateway {
    open_script: Mutex<VecDeque<HiveResult<()>>>,
    database: Mutex<Option<Arc<MockClusterDatabase>>>,
    open_attempts: AtomicUsize,
    heartbeat_rounds: AtomicUsize,
    upgrade_notify: Notify,
    upgrade_notifications_sent: AtomicUsize,
    fail_upgrade_notify: AtomicBool,
    fail_handover: AtomicBool,
    handler: Mutex<Option<Arc<dyn HeartbeatHandler>>>,
    log: EventLog,
}

impl MockGateway {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn with_database(self, database: Arc<MockClusterDatabase>) -> Self {
        *self.database.lock() = Some(database);
        self
    }

    pub fn script_open(&self, results: Vec<HiveResult<()>>) {
        self.open_script.lock().extend(results);
    }

    pub fn fail_upgrade_notify(&self, fail: bool) {
        self.fail_upgrade_notify.store(fail, Ordering::SeqCst);
    }

    pub fn fail_handover(&self, fail: bool) {
        self.fail_handover.store(fail, Ordering::SeqCst);
    }

    /// Simulate a peer announcing that the rolling upgrade finished
    pub fn send_upgrade_notification(&self) {
        self.upgrade_notify.notify_one();
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub fn heartbeat_rounds(&self) -> usize {
        self.heartbeat_rounds.load(Ordering::SeqCst)
    }

    pub fn upgrade_notifications_sent(&self) -> usize {
        self.upgrade_notifications_sent.load(Ordering::SeqCst)
    }

    pub fn has_subscriber(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Push a snapshot to the subscribed handler, as the leader would
    pub async fn deliver(&self, snapshot: HeartbeatSnapshot, is_leader: bool, unavailable: Vec<String>) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler.on_heartbeat(snapshot, is_leader, unavailable).await;
        }
    }
}

#[async_trait]
impl ClusterGateway for MockGateway {
    async fn open_database(&self, _timeout: Duration) -> HiveResult<Arc<dyn ClusterDatabase>> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        self.log.push("gateway.open");
        if let Some(Err(e)) = self.open_script.lock().pop_front() {
            return Err(e);
        }
        let database = self
            .database
            .lock()
            .get_or_insert_with(|| Arc::new(MockClusterDatabase::with_log(self.log.clone())))
            .clone();
        Ok(database)
    }

    async fn wait_upgrade_notification(&self) {
        self.upgrade_notify.notified().await;
    }

    async fn heartbeat_round(&self) -> HiveResult<()> {
        self.heartbeat_rounds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn notify_upgrade_completed(&self) -> HiveResult<()> {
        self.upgrade_notifications_sent.fetch_add(1, Ordering::SeqCst);
        if self.fail_upgrade_notify.load(Ordering::SeqCst) {
            return Err(HiveError::internal("member 3 unreachable"));
        }
        Ok(())
    }

    fn subscribe_heartbeats(&self, handler: Arc<dyn HeartbeatHandler>) {
        *self.handler.lock() = Some(handler);
    }

    async fn handover_member_role(&self) -> HiveResult<()> {
        self.log.push("gateway.handover");
        if self.fail_handover.load(Ordering::SeqCst) {
            return Err(HiveError::internal("no member can take over"));
        }
        Ok(())
    }

    async fn kill(&self) {
        self.log.push("gateway.kill");
    }

    async fn shutdown(&self) -> HiveResult<()> {
        self.log.push("gateway.shutdown");
        Ok(())
    }
}

pub struct MockClusterDatabase {
    node_id: Mutex<Option<u64>>,
    settings: Mutex<ClusterSettings>,
    certificates: Mutex<Vec<TrustedCertificate>>,
    fail_certificates: AtomicBool,
    certificate_reads: AtomicUsize,
    evacuated: AtomicBool,
    log: EventLog,
}

impl Default for MockClusterDatabase {
    fn default() -> Self {
        Self::with_log(EventLog::default())
    }
}

impl MockClusterDatabase {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            node_id: Mutex::new(Some(1)),
            settings: Mutex::new(ClusterSettings::default()),
            certificates: Mutex::new(Vec::new()),
            fail_certificates: AtomicBool::new(false),
            certificate_reads: AtomicUsize::new(0),
            evacuated: AtomicBool::new(false),
            log,
        }
    }

    pub fn set_evacuated(&self, evacuated: bool) {
        self.evacuated.store(evacuated, Ordering::SeqCst);
    }

    pub fn set_node_id(&self, node_id: Option<u64>) {
        *self.node_id.lock() = node_id;
    }

    pub fn set_settings(&self, settings: ClusterSettings) {
        *self.settings.lock() = settings;
    }

    pub fn set_certificates(&self, certs: Vec<TrustedCertificate>) {
        *self.certificates.lock() = certs;
    }

    pub fn fail_certificates(&self, fail: bool) {
        self.fail_certificates.store(fail, Ordering::SeqCst);
    }

    pub fn certificate_reads(&self) -> usize {
        self.certificate_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterDatabase for MockClusterDatabase {
    async fn node_id(&self) -> HiveResult<Option<u64>> {
        Ok(*self.node_id.lock())
    }

    async fn settings(&self) -> HiveResult<ClusterSettings> {
        Ok(self.settings.lock().clone())
    }

    async fn trusted_certificates(&self) -> HiveResult<Vec<TrustedCertificate>> {
        self.certificate_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_certificates.load(Ordering::SeqCst) {
            return Err(HiveError::internal("certificate table unreadable"));
        }
        Ok(self.certificates.lock().clone())
    }

    async fn local_member_evacuated(&self) -> HiveResult<bool> {
        Ok(self.evacuated.load(Ordering::SeqCst))
    }

    async fn close(&self) -> HiveResult<()> {
        self.log.push("cluster_db.close");
        Ok(())
    }
}

/// Records membership operations and the time spent inside each
/// role-mutating call
#[derive(Default)]
pub struct RecordingMembershipOps {
    calls: Mutex<Vec<String>>,
    sections: Mutex<Vec<(Instant, Instant)>>,
    section_delay: Mutex<Duration>,
    fail_maybe_update: AtomicBool,
    fail_discovery: AtomicBool,
    not_leader: AtomicBool,
    fail_rebalance: AtomicBool,
}

impl RecordingMembershipOps {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Enter/exit instants of every rebalance and raft-role upgrade
    pub fn sections(&self) -> Vec<(Instant, Instant)> {
        self.sections.lock().clone()
    }

    pub fn set_section_delay(&self, delay: Duration) {
        *self.section_delay.lock() = delay;
    }

    pub fn fail_maybe_update(&self, fail: bool) {
        self.fail_maybe_update.store(fail, Ordering::SeqCst);
    }

    pub fn fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::SeqCst);
    }

    pub fn set_not_leader(&self, not_leader: bool) {
        self.not_leader.store(not_leader, Ordering::SeqCst);
    }

    pub fn fail_rebalance(&self, fail: bool) {
        self.fail_rebalance.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: &str) {
        self.calls.lock().push(call.to_string());
    }

    async fn role_section(&self, call: &str) -> HiveResult<()> {
        self.record(call);
        let enter = Instant::now();
        let delay = *self.section_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.sections.lock().push((enter, Instant::now()));

        if self.not_leader.load(Ordering::SeqCst) {
            return Err(HiveError::not_leader(call));
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipOps for RecordingMembershipOps {
    async fn maybe_update(&self) -> HiveResult<()> {
        self.record("maybe_update");
        if self.fail_maybe_update.load(Ordering::SeqCst) {
            return Err(HiveError::internal("schema update failed"));
        }
        Ok(())
    }

    async fn refresh_service_discovery(&self, _members: &[ClusterMember]) -> HiveResult<()> {
        self.record("refresh_service_discovery");
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(HiveError::internal("dns peers unreachable"));
        }
        Ok(())
    }

    async fn rebalance_roles(&self, _unavailable_members: &[String]) -> HiveResult<()> {
        self.role_section("rebalance_roles").await?;
        if self.fail_rebalance.load(Ordering::SeqCst) {
            return Err(HiveError::internal("rebalance failed"));
        }
        Ok(())
    }

    async fn upgrade_members_without_raft_role(&self) -> HiveResult<()> {
        self.role_section("upgrade_members_without_raft_role").await
    }
}

/// Heartbeat handler that only records what it was given
#[derive(Default)]
pub struct RecordingHeartbeats {
    snapshots: Mutex<Vec<HeartbeatSnapshot>>,
}

impl RecordingHeartbeats {
    pub fn snapshots(&self) -> Vec<HeartbeatSnapshot> {
        self.snapshots.lock().clone()
    }
}

#[async_trait]
impl HeartbeatHandler for RecordingHeartbeats {
    async fn on_heartbeat(
        &self,
        snapshot: HeartbeatSnapshot,
        _is_leader: bool,
        _unavailable_members: Vec<String>,
    ) {
        self.snapshots.lock().push(snapshot);
    }
}
