//! Authorization scope computation

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::{
    abstractions::AuthorizationService,
    error::{HiveError, HiveResult},
    security::trust_store::TrustStore,
    types::{AccessScope, CertificateType, Protocol},
};

/// Permissions granted in each allowed project to a restricted TLS client
pub const RESTRICTED_PERMISSIONS: [&str; 7] = [
    "view",
    "manage-containers",
    "manage-images",
    "manage-networks",
    "manage-profiles",
    "manage-storage-volumes",
    "operate-containers",
];

pub struct AccessController {
    trust: Arc<TrustStore>,
    authorization: RwLock<Option<Arc<dyn AuthorizationService>>>,
}

impl AccessController {
    pub fn new(trust: Arc<TrustStore>) -> Self {
        Self {
            trust,
            authorization: RwLock::new(None),
        }
    }

    pub fn set_authorization(&self, service: Option<Arc<dyn AuthorizationService>>) {
        *self.authorization.write() = service;
    }

    /// Fast check used by routes without a custom access rule
    pub fn is_admin(&self, protocol: Option<Protocol>, scope: Option<&AccessScope>) -> bool {
        protocol == Some(Protocol::Cluster) || scope.map_or(false, |s| s.is_admin)
    }

    /// Compute the scope of a trusted caller.
    ///
    /// Errors from the authorization service are returned, never turned into
    /// an admin scope.
    pub async fn access_scope(&self, username: &str, protocol: Protocol) -> HiveResult<AccessScope> {
        if protocol == Protocol::Cluster {
            return Ok(AccessScope::admin());
        }

        if protocol == Protocol::Tls {
            let certs = self.trust.snapshot();
            return Ok(match certs.get(CertificateType::Client, username) {
                Some(cert) if cert.restricted => restricted_scope(&cert.projects),
                _ => AccessScope::admin(),
            });
        }

        // Only identities issued by the external service are known to RBAC
        let authorization = self.authorization.read().clone();
        if let (Protocol::Candid, Some(service)) = (protocol, authorization) {
            return service.user_access(username).await.map_err(|e| {
                HiveError::authorization(format!("access lookup for {} failed: {}", username, e))
            });
        }

        Ok(AccessScope::admin())
    }
}

fn restricted_scope(projects: &[String]) -> AccessScope {
    let permissions: BTreeSet<String> = RESTRICTED_PERMISSIONS.iter().map(|p| p.to_string()).collect();
    let project_permissions: BTreeMap<String, BTreeSet<String>> = projects
        .iter()
        .map(|project| (project.clone(), permissions.clone()))
        .collect();

    AccessScope {
        is_admin: false,
        project_permissions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs;
    use crate::test_helpers::{client_cert, StaticAuthorization};
    use pretty_assertions::assert_eq;

    fn controller_with_restricted(projects: &[&str]) -> (AccessController, String) {
        let cert = certs::generate("restricted").unwrap();
        let store = Arc::new(TrustStore::new());
        store.replace(vec![client_cert(&cert, CertificateType::Client, projects)]);
        (AccessController::new(store), cert.fingerprint().to_string())
    }

    #[tokio::test]
    async fn test_restricted_client_never_admin() {
        let (controller, fp) = controller_with_restricted(&["web", "db"]);

        let scope = controller.access_scope(&fp, Protocol::Tls).await.unwrap();
        assert!(!scope.is_admin);
        assert_eq!(
            scope.project_permissions.keys().cloned().collect::<Vec<_>>(),
            vec!["db".to_string(), "web".to_string()]
        );
        for permission in RESTRICTED_PERMISSIONS {
            assert!(scope.has_permission("web", permission));
        }
        assert!(!controller.is_admin(Some(Protocol::Tls), Some(&scope)));
    }

    #[tokio::test]
    async fn test_cluster_and_unrestricted_are_admin() {
        let controller = AccessController::new(Arc::new(TrustStore::new()));

        let cluster = controller.access_scope("", Protocol::Cluster).await.unwrap();
        assert!(cluster.is_admin);
        let unix = controller.access_scope("root", Protocol::Unix).await.unwrap();
        assert!(unix.is_admin);
        assert!(controller.is_admin(Some(Protocol::Cluster), None));
    }

    #[tokio::test]
    async fn test_authorization_failure_fails_closed() {
        let controller = AccessController::new(Arc::new(TrustStore::new()));
        controller.set_authorization(Some(Arc::new(StaticAuthorization::failing())));

        let err = controller
            .access_scope("alice@example.com", Protocol::Candid)
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::AuthorizationError { .. }));

        // The local socket bypasses the external service
        let unix = controller.access_scope("root", Protocol::Unix).await.unwrap();
        assert!(unix.is_admin);
    }

    #[tokio::test]
    async fn test_unrestricted_tls_client_ignores_authorization_service() {
        let cert = certs::generate("admin-client").unwrap();
        let store = Arc::new(TrustStore::new());
        store.replace(vec![client_cert(&cert, CertificateType::Client, &[])]);
        let controller = AccessController::new(store);
        controller.set_authorization(Some(Arc::new(StaticAuthorization::failing())));

        let scope = controller
            .access_scope(cert.fingerprint(), Protocol::Tls)
            .await
            .unwrap();
        assert!(scope.is_admin);
    }

    #[tokio::test]
    async fn test_restricted_tls_client_ignores_authorization_service() {
        let (controller, fp) = controller_with_restricted(&["web"]);
        controller.set_authorization(Some(Arc::new(StaticAuthorization::admin())));

        let scope = controller.access_scope(&fp, Protocol::Tls).await.unwrap();
        assert!(!scope.is_admin);
        assert!(scope.has_permission("web", "view"));
    }

    #[tokio::test]
    async fn test_authorization_scope_is_used() {
        let controller = AccessController::new(Arc::new(TrustStore::new()));
        controller.set_authorization(Some(Arc::new(StaticAuthorization::project("web", "view"))));

        let scope = controller
            .access_scope("alice@example.com", Protocol::Candid)
            .await
            .unwrap();
        assert!(!scope.is_admin);
        assert!(scope.has_permission("web", "view"));
    }
}
