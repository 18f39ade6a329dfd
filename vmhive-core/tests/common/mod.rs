//! Shared harness for daemon-level tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use vmhive_core::{
    storage::LocalDatabase,
    test_helpers::{
        EventLog, MockClusterDatabase, MockGateway, RecordingMembershipOps, RecordingSubsystems,
    },
    types::{RaftNode, RaftRole},
    Collaborators, Daemon, DaemonConfig,
};

/// A daemon wired to recording doubles in a scratch directory
pub struct TestNode {
    pub dir: TempDir,
    pub daemon: Daemon,
    pub log: EventLog,
    pub gateway: Arc<MockGateway>,
    pub database: Arc<MockClusterDatabase>,
    pub membership: Arc<RecordingMembershipOps>,
    pub subsystems: Arc<RecordingSubsystems>,
}

pub struct TestNodeBuilder {
    clustered: bool,
    customize: Vec<Box<dyn FnOnce(&mut Collaborators)>>,
    subsystems: Option<Arc<RecordingSubsystems>>,
    log: EventLog,
}

impl TestNodeBuilder {
    pub fn new() -> Self {
        Self {
            clustered: false,
            customize: Vec::new(),
            subsystems: None,
            log: EventLog::default(),
        }
    }

    /// Record a consensus node in the local database before start
    pub fn clustered(mut self) -> Self {
        self.clustered = true;
        self
    }

    pub fn with_collaborators(mut self, f: impl FnOnce(&mut Collaborators) + 'static) -> Self {
        self.customize.push(Box::new(f));
        self
    }

    /// Configure the subsystem doubles before the daemon sees them
    pub fn with_subsystems(mut self, f: impl FnOnce(&RecordingSubsystems)) -> Self {
        let subsystems = RecordingSubsystems::with_log(self.log.clone());
        f(&subsystems);
        self.subsystems = Some(Arc::new(subsystems));
        self
    }

    pub fn build(self) -> TestNode {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.daemon.var_dir = dir.path().to_path_buf();
        config.cluster.connect_timeout_clustered = Duration::from_secs(2);
        config.cluster.connect_timeout_standalone = Duration::from_secs(2);
        config.cluster.heartbeat_interval = Duration::from_millis(50);
        config.cluster.task_stop_grace = Duration::from_secs(2);
        config.cluster.degraded_stop_grace = Duration::from_secs(1);
        config.shutdown.default_timeout = Duration::from_secs(2);
        config.shutdown.storage_unmount_ceiling = Duration::from_millis(200);

        if self.clustered {
            let local = LocalDatabase::open(&dir.path().join("database/local.redb")).unwrap();
            local
                .add_raft_node(&RaftNode {
                    id: 1,
                    address: "10.0.0.1:8443".into(),
                    role: RaftRole::Voter,
                })
                .unwrap();
            local.close().unwrap();
        }

        let log = self.log;
        let database = Arc::new(MockClusterDatabase::with_log(log.clone()));
        let gateway = Arc::new(MockGateway::with_log(log.clone()).with_database(database.clone()));
        let membership = Arc::new(RecordingMembershipOps::default());
        let subsystems = self
            .subsystems
            .unwrap_or_else(|| Arc::new(RecordingSubsystems::with_log(log.clone())));

        let mut collaborators = Collaborators {
            gateway: Some(gateway.clone()),
            membership: Some(membership.clone()),
            instances: subsystems.clone(),
            storage: subsystems.clone(),
            networks: subsystems.clone(),
            operations: subsystems.clone(),
            auxiliary: subsystems.clone(),
            mounts: subsystems.clone(),
            ..Collaborators::default()
        };
        for customize in self.customize {
            customize(&mut collaborators);
        }

        TestNode {
            dir,
            daemon: Daemon::new(config, collaborators),
            log,
            gateway,
            database,
            membership,
            subsystems,
        }
    }
}
