//! Daemon configuration with TOML support
//!
//! Node-local settings come from a TOML file, then environment variables
//! (`VMHIVE_*`) override individual fields, then the result is validated.
//! Cluster-wide settings live in the replicated database and are modelled
//! separately by [`ClusterSettings`].

pub mod cluster;
pub mod defaults;

pub use cluster::{ClusterSettings, ExternalAuthSettings};

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HiveError, HiveResult};
use defaults::*;

/// Complete daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub daemon: DaemonSection,
    pub endpoints: EndpointsConfig,
    pub cluster: ClusterConfig,
    pub shutdown: ShutdownConfig,
    pub logging: LoggingConfig,
}

/// Process-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Directory holding the local database, certificates and sockets
    pub var_dir: PathBuf,

    /// Group that owns the primary control socket
    pub socket_group: Option<String>,
}

/// Listener settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Primary control socket; defaults to `<var_dir>/unix.socket`
    pub unix_socket: Option<PathBuf>,

    /// Guest-facing socket; defaults to `<var_dir>/guest.socket`
    pub guest_socket: Option<PathBuf>,

    /// HTTPS listener address. `core.https_address` in the local database wins.
    pub https_address: Option<SocketAddr>,
}

/// Cluster database bootstrap and background task timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    #[serde(with = "humantime_serde")]
    pub connect_timeout_clustered: Duration,

    #[serde(with = "humantime_serde")]
    pub connect_timeout_standalone: Duration,

    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Grace period given to a task group when it is stopped
    #[serde(with = "humantime_serde")]
    pub task_stop_grace: Duration,

    /// Grace period for the throwaway heartbeat group used in degraded mode
    #[serde(with = "humantime_serde")]
    pub degraded_stop_grace: Duration,

    #[serde(with = "humantime_serde")]
    pub certificate_refresh_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Used when the replicated database does not provide `core.shutdown_timeout`
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Upper bound on unmounting daemon storage volumes
    #[serde(with = "humantime_serde")]
    pub storage_unmount_ceiling: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,

    /// `pretty` or `json`
    pub format: String,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            var_dir: PathBuf::from(DEFAULT_VAR_DIR),
            socket_group: None,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            connect_timeout_clustered: DEFAULT_CONNECT_TIMEOUT_CLUSTERED,
            connect_timeout_standalone: DEFAULT_CONNECT_TIMEOUT_STANDALONE,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            task_stop_grace: DEFAULT_TASK_STOP_GRACE,
            degraded_stop_grace: DEFAULT_DEGRADED_STOP_GRACE,
            certificate_refresh_interval: DEFAULT_CERTIFICATE_REFRESH_INTERVAL,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            storage_unmount_ceiling: DEFAULT_STORAGE_UNMOUNT_CEILING,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file, apply environment overrides and validate
    pub fn from_file<P: AsRef<Path>>(path: P) -> HiveResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            HiveError::configuration(
                "config_file",
                format!("Failed to read {}: {}", path.display(), e),
            )
        })?;

        let mut config: DaemonConfig = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file
    pub fn from_env() -> HiveResult<Self> {
        let mut config = DaemonConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> HiveResult<()> {
        if let Ok(dir) = std::env::var("VMHIVE_DIR") {
            self.daemon.var_dir = PathBuf::from(dir);
        }

        if let Ok(group) = std::env::var("VMHIVE_SOCKET_GROUP") {
            self.daemon.socket_group = Some(group).filter(|g| !g.is_empty());
        }

        if let Ok(addr) = std::env::var("VMHIVE_HTTPS_ADDRESS") {
            let parsed = addr.parse().map_err(|e| {
                HiveError::configuration(
                    "endpoints.https_address",
                    format!("Invalid address '{}': {}", addr, e),
                )
            })?;
            self.endpoints.https_address = Some(parsed);
        }

        if let Ok(level) = std::env::var("VMHIVE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = std::env::var("VMHIVE_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> HiveResult<()> {
        if self.daemon.var_dir.as_os_str().is_empty() {
            return Err(HiveError::configuration(
                "daemon.var_dir",
                "Directory cannot be empty",
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(HiveError::configuration(
                "logging.format",
                format!("Unknown format '{}', expected pretty or json", self.logging.format),
            ));
        }

        for (field, value) in [
            ("cluster.connect_timeout_clustered", self.cluster.connect_timeout_clustered),
            ("cluster.connect_timeout_standalone", self.cluster.connect_timeout_standalone),
            ("cluster.heartbeat_interval", self.cluster.heartbeat_interval),
            ("shutdown.storage_unmount_ceiling", self.shutdown.storage_unmount_ceiling),
        ] {
            if value.is_zero() {
                return Err(HiveError::configuration(field, "Duration must be non-zero"));
            }
        }

        Ok(())
    }

    pub fn var_dir(&self) -> &Path {
        &self.daemon.var_dir
    }

    pub fn unix_socket_path(&self) -> PathBuf {
        self.endpoints
            .unix_socket
            .clone()
            .unwrap_or_else(|| self.daemon.var_dir.join(DEFAULT_UNIX_SOCKET_NAME))
    }

    pub fn guest_socket_path(&self) -> PathBuf {
        self.endpoints
            .guest_socket
            .clone()
            .unwrap_or_else(|| self.daemon.var_dir.join(DEFAULT_GUEST_SOCKET_NAME))
    }

    /// Connection timeout for opening the replicated database
    pub fn connect_timeout(&self, clustered: bool) -> Duration {
        if clustered {
            self.cluster.connect_timeout_clustered
        } else {
            self.cluster.connect_timeout_standalone
        }
    }
}
