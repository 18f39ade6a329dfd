//! Default configuration values for vmhive
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Daemon defaults
pub const DEFAULT_VAR_DIR: &str = "/var/lib/vmhive";
pub const DEFAULT_UNIX_SOCKET_NAME: &str = "unix.socket";
pub const DEFAULT_GUEST_SOCKET_NAME: &str = "guest.socket";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_FORMAT: &str = "pretty";

// Cluster defaults
pub const DEFAULT_CONNECT_TIMEOUT_CLUSTERED: Duration = duration_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT_STANDALONE: Duration = duration_secs(60);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = duration_secs(10);
pub const DEFAULT_TASK_STOP_GRACE: Duration = duration_secs(3);
pub const DEFAULT_DEGRADED_STOP_GRACE: Duration = duration_secs(1);
pub const DEFAULT_MAX_VOTERS: usize = 3;
pub const DEFAULT_MAX_STANDBY: usize = 2;

// Shutdown defaults
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = duration_secs(5 * 60);
pub const DEFAULT_STORAGE_UNMOUNT_CEILING: Duration = duration_secs(60);

// Background task defaults
pub const DEFAULT_CERTIFICATE_REFRESH_INTERVAL: Duration = duration_secs(10 * 60);

// External authentication defaults
pub const DEFAULT_CANDID_EXPIRY_SECS: u64 = 3600;

// Helper functions for Duration creation
pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
