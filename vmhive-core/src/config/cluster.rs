//! Cluster-wide settings stored in the replicated database

use std::collections::HashMap;
use std::time::Duration;

use super::defaults::*;
use crate::error::{HiveError, HiveResult};

pub const KEY_TRUST_CA_CERTIFICATES: &str = "core.trust_ca_certificates";
pub const KEY_SHUTDOWN_TIMEOUT: &str = "core.shutdown_timeout";
pub const KEY_BGP_ADDRESS: &str = "core.bgp_address";
pub const KEY_DNS_ADDRESS: &str = "core.dns_address";
pub const KEY_MAX_VOTERS: &str = "cluster.max_voters";
pub const KEY_MAX_STANDBY: &str = "cluster.max_standby";
pub const KEY_CANDID_API_URL: &str = "candid.api.url";
pub const KEY_CANDID_DOMAINS: &str = "candid.domains";
pub const KEY_CANDID_EXPIRY: &str = "candid.expiry";
pub const KEY_RBAC_API_URL: &str = "rbac.api.url";

/// Typed view over the cluster configuration table
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSettings {
    pub trust_ca_certificates: bool,
    pub max_voters: usize,
    pub max_standby: usize,
    /// `None` when unset, in which case the node-local default applies
    pub shutdown_timeout: Option<Duration>,
    pub external_auth: Option<ExternalAuthSettings>,
    pub rbac_api_url: Option<String>,
    pub bgp_address: Option<String>,
    pub dns_address: Option<String>,
}

/// Discharge-token identity service settings
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalAuthSettings {
    pub endpoint: String,
    /// Accepted identity domains; empty accepts all
    pub domains: Vec<String>,
    pub expiry: Duration,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            trust_ca_certificates: false,
            max_voters: DEFAULT_MAX_VOTERS,
            max_standby: DEFAULT_MAX_STANDBY,
            shutdown_timeout: None,
            external_auth: None,
            rbac_api_url: None,
            bgp_address: None,
            dns_address: None,
        }
    }
}

impl ClusterSettings {
    /// Parse settings from the raw key/value table, applying defaults
    pub fn from_map(values: &HashMap<String, String>) -> HiveResult<Self> {
        let get = |key: &str| {
            values
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let mut settings = ClusterSettings::default();

        if let Some(v) = get(KEY_TRUST_CA_CERTIFICATES) {
            settings.trust_ca_certificates = parse_bool(KEY_TRUST_CA_CERTIFICATES, v)?;
        }
        if let Some(v) = get(KEY_MAX_VOTERS) {
            settings.max_voters = parse_number(KEY_MAX_VOTERS, v)?;
            if settings.max_voters < 3 || settings.max_voters % 2 == 0 {
                return Err(HiveError::configuration(
                    KEY_MAX_VOTERS,
                    "Value must be an odd number equal to or higher than 3",
                ));
            }
        }
        if let Some(v) = get(KEY_MAX_STANDBY) {
            settings.max_standby = parse_number(KEY_MAX_STANDBY, v)?;
            if settings.max_standby > 5 {
                return Err(HiveError::configuration(
                    KEY_MAX_STANDBY,
                    "Value must be between 0 and 5",
                ));
            }
        }
        if let Some(v) = get(KEY_SHUTDOWN_TIMEOUT) {
            // Stored in minutes
            let minutes: u64 = parse_number(KEY_SHUTDOWN_TIMEOUT, v)?;
            settings.shutdown_timeout = Some(Duration::from_secs(minutes * 60));
        }

        if let Some(endpoint) = get(KEY_CANDID_API_URL) {
            let domains = get(KEY_CANDID_DOMAINS)
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            let expiry = match get(KEY_CANDID_EXPIRY) {
                Some(v) => Duration::from_secs(parse_number(KEY_CANDID_EXPIRY, v)?),
                None => Duration::from_secs(DEFAULT_CANDID_EXPIRY_SECS),
            };
            settings.external_auth = Some(ExternalAuthSettings {
                endpoint: endpoint.to_string(),
                domains,
                expiry,
            });
        }

        settings.rbac_api_url = get(KEY_RBAC_API_URL).map(String::from);
        settings.bgp_address = get(KEY_BGP_ADDRESS).map(String::from);
        settings.dns_address = get(KEY_DNS_ADDRESS).map(String::from);

        Ok(settings)
    }

    /// Shutdown timeout, falling back to the node-local default
    pub fn shutdown_timeout_or(&self, default: Duration) -> Duration {
        self.shutdown_timeout.unwrap_or(default)
    }
}

fn parse_bool(key: &str, value: &str) -> HiveResult<bool> {
    match value {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(HiveError::configuration(
            key,
            format!("Invalid boolean '{}'", other),
        )),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> HiveResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| HiveError::configuration(key, format!("Invalid number '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_map_uses_defaults() {
        let settings = ClusterSettings::from_map(&HashMap::new()).unwrap();
        assert_eq!(settings, ClusterSettings::default());
        assert_eq!(
            settings.shutdown_timeout_or(Duration::from_secs(300)),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_full_map() {
        let settings = ClusterSettings::from_map(&map(&[
            (KEY_TRUST_CA_CERTIFICATES, "true"),
            (KEY_MAX_VOTERS, "5"),
            (KEY_MAX_STANDBY, "1"),
            (KEY_SHUTDOWN_TIMEOUT, "2"),
            (KEY_CANDID_API_URL, "https://candid.example"),
            (KEY_CANDID_DOMAINS, "example.com, ops.example.com,"),
            (KEY_RBAC_API_URL, "https://rbac.example"),
            (KEY_DNS_ADDRESS, "10.0.0.1:53"),
        ]))
        .unwrap();

        assert!(settings.trust_ca_certificates);
        assert_eq!(settings.max_voters, 5);
        assert_eq!(settings.max_standby, 1);
        assert_eq!(settings.shutdown_timeout, Some(Duration::from_secs(120)));
        let external = settings.external_auth.unwrap();
        assert_eq!(external.domains, vec!["example.com", "ops.example.com"]);
        assert_eq!(external.expiry, Duration::from_secs(3600));
        assert_eq!(settings.rbac_api_url.as_deref(), Some("https://rbac.example"));
        assert_eq!(settings.bgp_address, None);
    }

    #[test]
    fn test_rejects_even_voter_count() {
        let err = ClusterSettings::from_map(&map(&[(KEY_MAX_VOTERS, "4")])).unwrap_err();
        assert!(matches!(err, HiveError::ConfigurationError { ref component, .. } if component == KEY_MAX_VOTERS));
    }

    #[test]
    fn test_rejects_bad_boolean() {
        assert!(ClusterSettings::from_map(&map(&[(KEY_TRUST_CA_CERTIFICATES, "maybe")])).is_err());
    }
}
