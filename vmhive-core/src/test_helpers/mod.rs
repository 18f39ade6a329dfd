//! Test doubles and fixtures
//!
//! Compiled for unit tests and, through the `test-helpers` feature, for the
//! integration tests under `tests/`.
//!
//! - `auth`: canned external authentication and authorization services
//! - `cluster`: scripted gateway, cluster database and membership operations
//! - `subsystems`: recording instance/storage/network doubles
//! - `timing`: polling helpers with CI-aware timeouts

pub mod auth;
pub mod cluster;
pub mod subsystems;
pub mod timing;

pub use auth::{StaticAuthorization, StaticExternalAuth};
pub use cluster::{MockClusterDatabase, MockGateway, RecordingHeartbeats, RecordingMembershipOps};
pub use subsystems::RecordingSubsystems;
pub use timing::{scaled_timeout, wait_for_condition};

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
    certs::CertificateInfo,
    types::{
        CertificateType, ClusterMember, ClusterVersion, HeartbeatSnapshot, RaftRole,
        TrustedCertificate,
    },
};

/// Ordered record of side effects shared between doubles
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.0.lock().iter().any(|e| e == event)
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == event)
    }

    /// Both events were recorded and `first` came earlier
    pub fn before(&self, first: &str, second: &str) -> bool {
        match (self.position(first), self.position(second)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

/// Trust entry for a generated certificate. A non-empty project list makes it restricted.
pub fn client_cert(
    cert: &CertificateInfo,
    cert_type: CertificateType,
    projects: &[&str],
) -> TrustedCertificate {
    TrustedCertificate {
        cert_type,
        fingerprint: cert.fingerprint().to_string(),
        name: format!("{:?}-test", cert_type).to_lowercase(),
        certificate: cert.der().to_vec(),
        restricted: !projects.is_empty(),
        projects: projects.iter().map(|p| p.to_string()).collect(),
    }
}

pub fn member(id: u64, address: &str, raft_role: RaftRole, online: bool) -> ClusterMember {
    ClusterMember {
        id,
        address: address.to_string(),
        raft_id: id,
        raft_role,
        online,
        last_heartbeat: Utc::now(),
        api_extensions: 1,
        schema_version: 1,
    }
}

/// Full snapshot at schema 1 from `members`
pub fn snapshot(members: Vec<ClusterMember>) -> HeartbeatSnapshot {
    HeartbeatSnapshot {
        members: members.into_iter().map(|m| (m.id, m)).collect::<BTreeMap<_, _>>(),
        full_state_list: true,
        version: ClusterVersion {
            schema: 1,
            api_extensions: 1,
        },
    }
}
