//! Server and network certificates
//!
//! The server certificate identifies this daemon to clients. The network
//! certificate is shared by all cluster members and is the one presented on
//! the HTTPS listener. Both are generated on first start and kept in the var
//! directory as `<name>.crt` / `<name>.key`.

use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::error::{HiveError, HiveResult};

const VALIDITY_DAYS: i64 = 3650;
pub const SERVER_CERT_NAME: &str = "server";
pub const NETWORK_CERT_NAME: &str = "cluster";
pub const CA_CERT_FILE: &str = "server.ca";

/// PEM encoded certificate with its private key
#[derive(Clone)]
pub struct CertificateInfo {
    pub cert_pem: String,
    pub key_pem: String,
    der: Vec<u8>,
    fingerprint: String,
}

impl std::fmt::Debug for CertificateInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateInfo")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl CertificateInfo {
    pub fn from_pem(cert_pem: String, key_pem: String) -> HiveResult<Self> {
        let der = pem::parse(cert_pem.as_bytes())?.into_contents();
        let fingerprint = fingerprint(&der);
        Ok(Self {
            cert_pem,
            key_pem,
            der,
            fingerprint,
        })
    }

    /// Load `<dir>/<name>.crt` and `.key`, generating a fresh pair when absent
    pub async fn load_or_generate(dir: &Path, name: &str) -> HiveResult<Self> {
        let (cert_path, key_path) = paths(dir, name);

        if fs::try_exists(&cert_path).await? && fs::try_exists(&key_path).await? {
            let cert_pem = fs::read_to_string(&cert_path).await?;
            let key_pem = fs::read_to_string(&key_path).await?;
            let info = Self::from_pem(cert_pem, key_pem)?;
            info!(name, fingerprint = %info.fingerprint, "Loaded certificate");
            return Ok(info);
        }

        let info = generate(&hostname())?;
        save(&info, &cert_path, &key_path).await?;
        info!(name, fingerprint = %info.fingerprint, "Generated certificate");
        Ok(info)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Certificates the daemon serves with
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    pub server: CertificateInfo,
    pub network: CertificateInfo,
    /// DER of `server.ca` when present
    pub ca: Option<Vec<u8>>,
}

impl CertificateBundle {
    pub async fn load(var_dir: &Path) -> HiveResult<Self> {
        let network = CertificateInfo::load_or_generate(var_dir, NETWORK_CERT_NAME).await?;
        let server = CertificateInfo::load_or_generate(var_dir, SERVER_CERT_NAME).await?;

        let ca_path = var_dir.join(CA_CERT_FILE);
        let ca = if fs::try_exists(&ca_path).await? {
            let ca_pem = fs::read(&ca_path).await?;
            info!(path = %ca_path.display(), "Loaded CA certificate");
            Some(pem::parse(ca_pem)?.into_contents())
        } else {
            None
        };

        Ok(Self {
            server,
            network,
            ca,
        })
    }
}

/// Lowercase hex SHA-256 of a DER encoded certificate
pub fn fingerprint(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}

/// Generate a self-signed certificate usable for both server and client auth
pub fn generate(common_name: &str) -> HiveResult<CertificateInfo> {
    let mut params = CertificateParams::new(vec![common_name.to_string()]);

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, format!("root@{}", common_name));
    dn.push(DnType::OrganizationName, "vmhive");
    params.distinguished_name = dn;

    params.subject_alt_names = vec![SanType::DnsName(common_name.to_string())];
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];

    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(VALIDITY_DAYS);

    params.alg = &rcgen::PKCS_ECDSA_P384_SHA384;
    params.key_pair = Some(KeyPair::generate(&rcgen::PKCS_ECDSA_P384_SHA384)?);

    let cert = Certificate::from_params(params)?;
    let cert_pem = cert.serialize_pem()?;
    let key_pem = cert.serialize_private_key_pem();

    CertificateInfo::from_pem(cert_pem, key_pem)
}

fn paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{}.crt", name)),
        dir.join(format!("{}.key", name)),
    )
}

async fn save(info: &CertificateInfo, cert_path: &Path, key_path: &Path) -> HiveResult<()> {
    if let Some(parent) = cert_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(cert_path, &info.cert_pem).await?;
    fs::write(key_path, &info.key_pem).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| HiveError::security(format!("Failed to restrict key permissions: {}", e)))?;
    }

    Ok(())
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_generate_then_reload_keeps_fingerprint() {
        let dir = tempfile::tempdir().unwrap();

        let first = CertificateInfo::load_or_generate(dir.path(), SERVER_CERT_NAME)
            .await
            .unwrap();
        let second = CertificateInfo::load_or_generate(dir.path(), SERVER_CERT_NAME)
            .await
            .unwrap();

        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint(), fingerprint(first.der()));
        assert_eq!(first.fingerprint().len(), 64);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("server.key"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_bundle_without_ca() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = CertificateBundle::load(dir.path()).await.unwrap();

        assert!(bundle.ca.is_none());
        assert_ne!(bundle.server.fingerprint(), bundle.network.fingerprint());
    }

    #[test]
    fn test_fingerprint_is_lowercase_hex() {
        let fp = fingerprint(b"not really a certificate");
        assert!(fp.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
