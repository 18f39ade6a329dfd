//! Core types shared across the control plane

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Trust list a certificate belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    /// Another cluster member
    Server,
    /// An API client
    Client,
    /// A metrics scraper, only valid on the metrics path
    Metrics,
}

/// Certificate trusted for one authentication protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedCertificate {
    pub cert_type: CertificateType,
    /// Lowercase hex SHA-256 of the DER encoding
    pub fingerprint: String,
    /// Owning identity, usually a member or client name
    pub name: String,
    /// DER encoded certificate
    pub certificate: Vec<u8>,
    /// Restricted clients may only act within `projects`
    pub restricted: bool,
    pub projects: Vec<String>,
}

/// How a request was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Unix,
    Tls,
    Cluster,
    Candid,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Unix => "unix",
            Protocol::Tls => "tls",
            Protocol::Cluster => "cluster",
            Protocol::Candid => "candid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unix" => Some(Protocol::Unix),
            "tls" => Some(Protocol::Tls),
            "cluster" => Some(Protocol::Cluster),
            "candid" => Some(Protocol::Candid),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request caller identity, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub username: String,
    pub protocol: Protocol,
}

/// Authorization scope attached to a trusted request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccessScope {
    pub is_admin: bool,
    pub project_permissions: BTreeMap<String, BTreeSet<String>>,
}

impl AccessScope {
    pub fn admin() -> Self {
        Self {
            is_admin: true,
            project_permissions: BTreeMap::new(),
        }
    }

    pub fn has_permission(&self, project: &str, permission: &str) -> bool {
        self.is_admin
            || self
                .project_permissions
                .get(project)
                .map_or(false, |perms| perms.contains(permission))
    }
}

/// Consensus role of a cluster member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaftRole {
    Voter,
    Standby,
    Spare,
}

/// Member entry in a heartbeat snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub id: u64,
    pub address: String,
    /// Zero until the member has joined the consensus log
    pub raft_id: u64,
    pub raft_role: RaftRole,
    pub online: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub api_extensions: u64,
    pub schema_version: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterVersion {
    pub schema: u64,
    pub api_extensions: u64,
}

/// Cluster-wide state pushed by the leader on each heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatSnapshot {
    pub members: BTreeMap<u64, ClusterMember>,
    /// False when the leader could not reach everyone; such snapshots are partial
    pub full_state_list: bool,
    pub version: ClusterVersion,
}

/// Consensus node recorded in the local database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftNode {
    pub id: u64,
    pub address: String,
    pub role: RaftRole,
}

/// Managed workload as seen by the lifecycle manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: String,
    pub project: String,
    pub running: bool,
}

/// Events broadcast to collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DaemonEvent {
    SetupComplete,
    Ready,
    ShuttingDown { signal: String },
    MembershipChanged { members: usize },
    CertificatesRefreshed { count: usize },
}
