//! Trusted certificate cache
//!
//! Readers take a snapshot (`Arc<CertificateSet>`) and never observe a
//! partially refreshed set: refreshes build a complete new set and swap it in
//! under the write lock.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::{
    abstractions::ClusterDatabase,
    error::HiveResult,
    types::{CertificateType, TrustedCertificate},
};

/// Immutable certificate set indexed by type and fingerprint
#[derive(Debug, Default, Clone)]
pub struct CertificateSet {
    by_type: HashMap<CertificateType, HashMap<String, TrustedCertificate>>,
}

impl CertificateSet {
    pub fn from_certificates(certs: impl IntoIterator<Item = TrustedCertificate>) -> Self {
        let mut by_type: HashMap<CertificateType, HashMap<String, TrustedCertificate>> =
            HashMap::new();
        for cert in certs {
            by_type
                .entry(cert.cert_type)
                .or_default()
                .insert(cert.fingerprint.clone(), cert);
        }
        Self { by_type }
    }

    pub fn get(&self, cert_type: CertificateType, fingerprint: &str) -> Option<&TrustedCertificate> {
        self.by_type.get(&cert_type)?.get(fingerprint)
    }

    pub fn contains(&self, cert_type: CertificateType, fingerprint: &str) -> bool {
        self.get(cert_type, fingerprint).is_some()
    }

    pub fn count(&self, cert_type: CertificateType) -> usize {
        self.by_type.get(&cert_type).map_or(0, HashMap::len)
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct TrustStore {
    current: RwLock<Arc<CertificateSet>>,
    refresh: tokio::sync::Mutex<()>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current certificate set
    pub fn snapshot(&self) -> Arc<CertificateSet> {
        self.current.read().clone()
    }

    /// Swap in a complete new set
    pub fn replace(&self, certs: Vec<TrustedCertificate>) {
        let set = Arc::new(CertificateSet::from_certificates(certs));
        debug!(
            servers = set.count(CertificateType::Server),
            clients = set.count(CertificateType::Client),
            metrics = set.count(CertificateType::Metrics),
            "Replacing trusted certificate set"
        );
        *self.current.write() = set;
    }

    /// Rebuild the cache from the replicated database.
    ///
    /// Concurrent refreshes are serialized so an older read can never
    /// overwrite a newer one.
    pub async fn refresh(&self, database: &dyn ClusterDatabase) -> HiveResult<usize> {
        let _guard = self.refresh.lock().await;
        let certs = database.trusted_certificates().await?;
        let count = certs.len();
        self.replace(certs);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(cert_type: CertificateType, fingerprint: &str) -> TrustedCertificate {
        TrustedCertificate {
            cert_type,
            fingerprint: fingerprint.to_string(),
            name: fingerprint.to_string(),
            certificate: Vec::new(),
            restricted: false,
            projects: Vec::new(),
        }
    }

    #[test]
    fn test_lookup_is_per_type() {
        let store = TrustStore::new();
        store.replace(vec![
            cert(CertificateType::Server, "aa"),
            cert(CertificateType::Client, "bb"),
        ]);

        let set = store.snapshot();
        assert!(set.contains(CertificateType::Server, "aa"));
        assert!(!set.contains(CertificateType::Client, "aa"));
        assert!(set.contains(CertificateType::Client, "bb"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_old_snapshot_survives_replace() {
        let store = TrustStore::new();
        store.replace(vec![cert(CertificateType::Client, "old")]);
        let before = store.snapshot();

        store.replace(vec![cert(CertificateType::Client, "new")]);

        assert!(before.contains(CertificateType::Client, "old"));
        assert!(!before.contains(CertificateType::Client, "new"));
        assert!(store.snapshot().contains(CertificateType::Client, "new"));
        assert!(!store.snapshot().contains(CertificateType::Client, "old"));
    }
}
