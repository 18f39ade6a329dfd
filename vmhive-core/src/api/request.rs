//! Per-request context
//!
//! Listeners attach a [`ConnectionInfo`] to every request as an extension
//! before it reaches the router. The dispatcher turns it, together with the
//! authentication outcome, into the [`RequestContext`] handlers receive.

use axum::extract::Query;
use http::{HeaderMap, Uri};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;

use crate::{
    api::endpoint::ApiVersion,
    types::{AccessScope, Identity, Protocol},
};

/// Set by a client that already authenticated out of band; such requests are
/// never served as untrusted
pub const HEADER_AUTHENTICATED: &str = "X-Hive-Authenticated";
/// Identity of the original caller when a cluster member forwards a request
pub const HEADER_FORWARDED_ADDRESS: &str = "X-Hive-Forwarded-Address";
pub const HEADER_FORWARDED_USERNAME: &str = "X-Hive-Forwarded-Username";
pub const HEADER_FORWARDED_PROTOCOL: &str = "X-Hive-Forwarded-Protocol";
/// User agent of intra-cluster notifications
pub const CLUSTER_NOTIFIER_USER_AGENT: &str = "vmhive-cluster-notifier";
/// Present when the client speaks the discharge token protocol
pub const BAKERY_PROTOCOL_HEADER: &str = "Bakery-Protocol-Version";
/// The only path metrics certificates are valid for
pub const METRICS_PATH: &str = "/1.0/metrics";
/// Project used when a request names none
pub const DEFAULT_PROJECT: &str = "default";

/// Transport a request arrived on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionInfo {
    /// Primary control socket
    Unix { uid: Option<u32>, pid: Option<i32> },
    /// Socket exposed to guests
    Guest { uid: Option<u32>, pid: Option<i32> },
    /// Network listener with the client's certificate chain (DER)
    Tls {
        remote: SocketAddr,
        peer_certificates: Vec<Vec<u8>>,
    },
    /// Anything without transport security
    Plain { remote: Option<SocketAddr> },
}

impl ConnectionInfo {
    pub fn is_unix(&self) -> bool {
        matches!(self, ConnectionInfo::Unix { .. })
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        match self {
            ConnectionInfo::Tls { remote, .. } => Some(*remote),
            ConnectionInfo::Plain { remote } => *remote,
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionInfo::Unix { pid, .. } | ConnectionInfo::Guest { pid, .. } => {
                let kind = if self.is_unix() { "@" } else { "guest@" };
                match pid {
                    Some(pid) => write!(f, "{}pid={}", kind, pid),
                    None => f.write_str(kind),
                }
            }
            ConnectionInfo::Tls { remote, .. } => write!(f, "{}", remote),
            ConnectionInfo::Plain { remote: Some(remote) } => write!(f, "{}", remote),
            ConnectionInfo::Plain { remote: None } => f.write_str("unknown"),
        }
    }
}

/// Whether the request claims to be an intra-cluster notification
pub fn is_cluster_notification(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ua| ua == CLUSTER_NOTIFIER_USER_AGENT)
}

/// Original caller of a request forwarded by another member
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardedIdentity {
    pub address: Option<String>,
    pub username: Option<String>,
    pub protocol: Option<Protocol>,
}

impl ForwardedIdentity {
    /// Read the forwarding headers. Returns `None` when none are set.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let forwarded = Self {
            address: read(HEADER_FORWARDED_ADDRESS),
            username: read(HEADER_FORWARDED_USERNAME),
            protocol: read(HEADER_FORWARDED_PROTOCOL).and_then(|p| Protocol::parse(&p)),
        };

        (forwarded != Self::default()).then_some(forwarded)
    }
}

/// What a handler knows about the request it serves
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trusted: bool,
    pub identity: Option<Identity>,
    pub access: Option<AccessScope>,
    pub forwarded: Option<ForwardedIdentity>,
    pub connection: ConnectionInfo,
    pub version: ApiVersion,
    /// Registered endpoint name, e.g. `operations/:id`
    pub endpoint: String,
    /// Target project from the `project` query parameter
    pub project: String,
}

impl RequestContext {
    pub fn new(connection: ConnectionInfo, version: ApiVersion, endpoint: impl Into<String>) -> Self {
        Self {
            trusted: false,
            identity: None,
            access: None,
            forwarded: None,
            connection,
            version,
            endpoint: endpoint.into(),
            project: DEFAULT_PROJECT.to_string(),
        }
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.identity.as_ref().map(|i| i.protocol)
    }

    pub fn username(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.username.as_str())
    }
}

#[derive(Deserialize)]
struct ProjectQuery {
    project: Option<String>,
}

/// Project named by `?project=`, or the default project
pub fn project_from_uri(uri: &Uri) -> String {
    Query::<ProjectQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(query)| query.project)
        .filter(|project| !project.is_empty())
        .unwrap_or_else(|| DEFAULT_PROJECT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_forwarded_identity_requires_a_header() {
        assert_eq!(ForwardedIdentity::from_headers(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_FORWARDED_USERNAME, HeaderValue::from_static("alice"));
        headers.insert(HEADER_FORWARDED_PROTOCOL, HeaderValue::from_static("candid"));
        let forwarded = ForwardedIdentity::from_headers(&headers).unwrap();
        assert_eq!(forwarded.username.as_deref(), Some("alice"));
        assert_eq!(forwarded.protocol, Some(Protocol::Candid));
        assert_eq!(forwarded.address, None);
    }

    #[test]
    fn test_cluster_notification_user_agent() {
        let mut headers = HeaderMap::new();
        assert!(!is_cluster_notification(&headers));
        headers.insert(
            http::header::USER_AGENT,
            HeaderValue::from_static(CLUSTER_NOTIFIER_USER_AGENT),
        );
        assert!(is_cluster_notification(&headers));
    }

    #[test]
    fn test_project_from_query() {
        let uri: Uri = "/1.0/instances?project=web&recursion=1".parse().unwrap();
        assert_eq!(project_from_uri(&uri), "web");
        let uri: Uri = "/1.0/instances".parse().unwrap();
        assert_eq!(project_from_uri(&uri), DEFAULT_PROJECT);
        let uri: Uri = "/1.0/instances?project=".parse().unwrap();
        assert_eq!(project_from_uri(&uri), DEFAULT_PROJECT);
    }

    #[test]
    fn test_connection_display() {
        let unix = ConnectionInfo::Unix {
            uid: Some(0),
            pid: Some(42),
        };
        assert_eq!(unix.to_string(), "@pid=42");
        let plain = ConnectionInfo::Plain { remote: None };
        assert_eq!(plain.to_string(), "unknown");
    }
}
