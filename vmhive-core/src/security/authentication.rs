//! Request authentication
//!
//! [`AuthenticationGate::authenticate`] classifies a request by transport and
//! credentials. The first matching rule wins:
//!
//! 1. TLS peer certificate matching a trusted server certificate: `cluster`.
//! 2. Primary control socket: `unix`, username from the peer uid.
//! 3. Guest socket: rejected.
//! 4. Cluster notification without a server certificate: rejected.
//! 5. No TLS: rejected.
//! 6. Discharge token header with external auth configured: delegated, `candid`.
//! 7. Metrics or client certificate (optionally CA-signed): `tls`.
//! 8. Anything else is untrusted.
//!
//! The gate only reads shared state, so it is safe to call on every request.

use http::HeaderMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use x509_parser::prelude::*;

use crate::{
    abstractions::ExternalAuthenticator,
    api::request::{is_cluster_notification, ConnectionInfo, BAKERY_PROTOCOL_HEADER, METRICS_PATH},
    certs::fingerprint,
    error::{HiveError, HiveResult},
    security::trust_store::{CertificateSet, TrustStore},
    types::{CertificateType, Identity, Protocol},
};

/// Result of authenticating one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub trusted: bool,
    pub username: String,
    pub protocol: Option<Protocol>,
}

impl AuthOutcome {
    pub fn untrusted() -> Self {
        Self {
            trusted: false,
            username: String::new(),
            protocol: None,
        }
    }

    fn trusted(username: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            trusted: true,
            username: username.into(),
            protocol: Some(protocol),
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        match (self.trusted, self.protocol) {
            (true, Some(protocol)) => Some(Identity {
                username: self.username.clone(),
                protocol,
            }),
            _ => None,
        }
    }
}

/// Whether CA-signed client certificates are trusted without being listed
#[derive(Debug, Clone, Default)]
pub struct CaPolicy {
    pub trust_ca_certificates: bool,
    /// DER encoded CA certificate
    pub ca: Option<Vec<u8>>,
}

struct ExternalAuth {
    service: Arc<dyn ExternalAuthenticator>,
    domains: Vec<String>,
}

pub struct AuthenticationGate {
    trust: Arc<TrustStore>,
    ca_policy: RwLock<CaPolicy>,
    external: RwLock<Option<Arc<ExternalAuth>>>,
    shutdown: CancellationToken,
}

impl AuthenticationGate {
    pub fn new(trust: Arc<TrustStore>, shutdown: CancellationToken) -> Self {
        Self {
            trust,
            ca_policy: RwLock::new(CaPolicy::default()),
            external: RwLock::new(None),
            shutdown,
        }
    }

    pub fn set_ca_policy(&self, policy: CaPolicy) {
        *self.ca_policy.write() = policy;
    }

    /// Install or remove the external identity service
    pub fn set_external(&self, service: Option<(Arc<dyn ExternalAuthenticator>, Vec<String>)>) {
        *self.external.write() =
            service.map(|(service, domains)| Arc::new(ExternalAuth { service, domains }));
    }

    pub fn has_external(&self) -> bool {
        self.external.read().is_some()
    }

    pub async fn authenticate(
        &self,
        connection: &ConnectionInfo,
        headers: &HeaderMap,
        path: &str,
    ) -> HiveResult<AuthOutcome> {
        let trusted = self.trust.snapshot();

        // Cluster members present the shared network certificate
        if let ConnectionInfo::Tls {
            peer_certificates, ..
        } = connection
        {
            for der in peer_certificates {
                if let Some(fp) = check_trust(&trusted, CertificateType::Server, der, None) {
                    return Ok(AuthOutcome::trusted(fp, Protocol::Cluster));
                }
            }
        }

        match connection {
            ConnectionInfo::Unix { uid, .. } => {
                let uid = uid.ok_or_else(|| {
                    HiveError::authentication("unable to read peer credentials")
                })?;
                return Ok(AuthOutcome::trusted(username_for_uid(uid), Protocol::Unix));
            }
            ConnectionInfo::Guest { .. } => return Err(HiveError::GuestSocketRejected),
            _ => {}
        }

        if is_cluster_notification(headers) {
            return Err(HiveError::UntrustedClusterNotification);
        }

        let peer_certificates = match connection {
            ConnectionInfo::Tls {
                peer_certificates, ..
            } => peer_certificates,
            _ => return Err(HiveError::MissingTls),
        };

        if headers.contains_key(BAKERY_PROTOCOL_HEADER) {
            let external = self.external.read().clone();
            if let Some(external) = external {
                return self.authenticate_external(&external, headers, path).await;
            }
        }

        let policy = self.ca_policy.read().clone();

        if path == METRICS_PATH {
            for der in peer_certificates {
                if let Some(fp) = check_trust(&trusted, CertificateType::Metrics, der, Some(&policy)) {
                    return Ok(AuthOutcome::trusted(fp, Protocol::Tls));
                }
            }
        }

        for der in peer_certificates {
            if let Some(fp) = check_trust(&trusted, CertificateType::Client, der, Some(&policy)) {
                return Ok(AuthOutcome::trusted(fp, Protocol::Tls));
            }
        }

        Ok(AuthOutcome::untrusted())
    }

    async fn authenticate_external(
        &self,
        external: &ExternalAuth,
        headers: &HeaderMap,
        path: &str,
    ) -> HiveResult<AuthOutcome> {
        let identity = tokio::select! {
            result = external.service.authenticate(headers, path) => result?,
            _ = self.shutdown.cancelled() => {
                return Err(HiveError::cancelled("external authentication"));
            }
        };

        if !external.domains.is_empty() {
            let allowed = identity
                .domain
                .as_ref()
                .map_or(false, |domain| external.domains.contains(domain));
            if !allowed {
                warn!(
                    username = %identity.username,
                    domain = ?identity.domain,
                    "Rejecting identity from unlisted domain"
                );
                return Ok(AuthOutcome::untrusted());
            }
        }

        let username = match identity.domain {
            Some(domain) => format!("{}@{}", identity.username, domain),
            None => identity.username,
        };
        Ok(AuthOutcome::trusted(username, Protocol::Candid))
    }
}

/// Fingerprint of `der` when it is trusted as `cert_type`
fn check_trust(
    trusted: &CertificateSet,
    cert_type: CertificateType,
    der: &[u8],
    policy: Option<&CaPolicy>,
) -> Option<String> {
    let fp = fingerprint(der);

    if let Some(policy) = policy.filter(|p| p.trust_ca_certificates) {
        if let Some(ca) = &policy.ca {
            if signed_by(der, ca) {
                debug!(fingerprint = %fp, "Trusting CA-signed certificate");
                return Some(fp);
            }
        }
    }

    trusted.contains(cert_type, &fp).then_some(fp)
}

/// Whether `der` is currently valid and its signature verifies against `ca_der`
pub fn signed_by(der: &[u8], ca_der: &[u8]) -> bool {
    let (Ok((_, cert)), Ok((_, ca))) = (
        X509Certificate::from_der(der),
        X509Certificate::from_der(ca_der),
    ) else {
        return false;
    };

    cert.validity().is_valid()
        && cert.issuer() == ca.subject()
        && cert.verify_signature(Some(ca.public_key())).is_ok()
}

fn username_for_uid(uid: u32) -> String {
    match nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => format!("uid={}", uid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::ExternalIdentity;
    use crate::certs;
    use crate::test_helpers::{client_cert, StaticExternalAuth};
    use crate::types::TrustedCertificate;
    use http::HeaderValue;
    use pretty_assertions::assert_eq;

    fn tls(der: Vec<u8>) -> ConnectionInfo {
        ConnectionInfo::Tls {
            remote: "10.0.0.9:50000".parse().unwrap(),
            peer_certificates: vec![der],
        }
    }

    fn gate_with(certs: Vec<TrustedCertificate>) -> AuthenticationGate {
        let store = Arc::new(TrustStore::new());
        store.replace(certs);
        AuthenticationGate::new(store, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_server_certificate_wins_over_client_listing() {
        let cert = certs::generate("member1").unwrap();
        let gate = gate_with(vec![
            client_cert(&cert, CertificateType::Server, &[]),
            client_cert(&cert, CertificateType::Client, &[]),
        ]);

        let outcome = gate
            .authenticate(&tls(cert.der().to_vec()), &HeaderMap::new(), "/1.0")
            .await
            .unwrap();
        assert_eq!(outcome.protocol, Some(Protocol::Cluster));
        assert!(outcome.trusted);
    }

    #[tokio::test]
    async fn test_unix_socket_is_trusted() {
        let gate = gate_with(vec![]);
        let outcome = gate
            .authenticate(
                &ConnectionInfo::Unix {
                    uid: Some(0),
                    pid: None,
                },
                &HeaderMap::new(),
                "/1.0",
            )
            .await
            .unwrap();
        assert_eq!(outcome.protocol, Some(Protocol::Unix));
        assert!(!outcome.username.is_empty());
    }

    #[test]
    fn test_unknown_uid_falls_back_to_synthetic_name() {
        assert_eq!(username_for_uid(4_000_000_000), "uid=4000000000");
    }

    #[tokio::test]
    async fn test_guest_socket_is_rejected() {
        let gate = gate_with(vec![]);
        let err = gate
            .authenticate(
                &ConnectionInfo::Guest {
                    uid: Some(0),
                    pid: None,
                },
                &HeaderMap::new(),
                "/1.0",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::GuestSocketRejected));
    }

    #[tokio::test]
    async fn test_cluster_notification_without_server_cert() {
        let gate = gate_with(vec![]);
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::USER_AGENT,
            HeaderValue::from_static(crate::api::request::CLUSTER_NOTIFIER_USER_AGENT),
        );
        let cert = certs::generate("stranger").unwrap();

        let err = gate
            .authenticate(&tls(cert.der().to_vec()), &headers, "/1.0")
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::UntrustedClusterNotification));
    }

    #[tokio::test]
    async fn test_plain_transport_is_rejected() {
        let gate = gate_with(vec![]);
        let err = gate
            .authenticate(&ConnectionInfo::Plain { remote: None }, &HeaderMap::new(), "/1.0")
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::MissingTls));
    }

    #[tokio::test]
    async fn test_metrics_certificate_only_on_metrics_path() {
        let cert = certs::generate("scraper").unwrap();
        let gate = gate_with(vec![client_cert(&cert, CertificateType::Metrics, &[])]);
        let conn = tls(cert.der().to_vec());

        let on_metrics = gate
            .authenticate(&conn, &HeaderMap::new(), METRICS_PATH)
            .await
            .unwrap();
        assert!(on_metrics.trusted);
        assert_eq!(on_metrics.username, cert.fingerprint());

        let elsewhere = gate.authenticate(&conn, &HeaderMap::new(), "/1.0").await.unwrap();
        assert_eq!(elsewhere, AuthOutcome::untrusted());
    }

    #[tokio::test]
    async fn test_external_domain_filter() {
        let gate = gate_with(vec![]);
        gate.set_external(Some((
            Arc::new(StaticExternalAuth::ok(ExternalIdentity {
                username: "alice".into(),
                domain: Some("example.com".into()),
            })),
            vec!["example.com".to_string()],
        )));
        let mut headers = HeaderMap::new();
        headers.insert(BAKERY_PROTOCOL_HEADER, HeaderValue::from_static("3"));
        let cert = certs::generate("browser").unwrap();

        let outcome = gate
            .authenticate(&tls(cert.der().to_vec()), &headers, "/1.0")
            .await
            .unwrap();
        assert_eq!(outcome.username, "alice@example.com");
        assert_eq!(outcome.protocol, Some(Protocol::Candid));

        gate.set_external(Some((
            Arc::new(StaticExternalAuth::ok(ExternalIdentity {
                username: "mallory".into(),
                domain: Some("evil.example".into()),
            })),
            vec!["example.com".to_string()],
        )));
        let outcome = gate
            .authenticate(&tls(cert.der().to_vec()), &headers, "/1.0")
            .await
            .unwrap();
        assert!(!outcome.trusted);
    }

    #[tokio::test]
    async fn test_discharge_required_is_propagated() {
        let gate = gate_with(vec![]);
        gate.set_external(Some((Arc::new(StaticExternalAuth::discharge()), vec![])));
        let mut headers = HeaderMap::new();
        headers.insert(BAKERY_PROTOCOL_HEADER, HeaderValue::from_static("3"));
        let cert = certs::generate("browser").unwrap();

        let err = gate
            .authenticate(&tls(cert.der().to_vec()), &headers, "/1.0")
            .await
            .unwrap_err();
        assert!(err.is_discharge_required());
    }

    #[test]
    fn test_self_signed_is_not_signed_by_other_ca() {
        let leaf = certs::generate("leaf").unwrap();
        let other = certs::generate("other").unwrap();
        assert!(!signed_by(leaf.der(), other.der()));
        assert!(!signed_by(b"garbage", other.der()));
    }
}
