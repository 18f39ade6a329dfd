//! Workload, storage and network subsystems driven by the lifecycle manager

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::{error::HiveResult, types::InstanceInfo};

#[async_trait]
pub trait InstanceManager: Send + Sync {
    /// Instances assigned to this member according to the replicated database
    async fn list_local(&self) -> HiveResult<Vec<InstanceInfo>>;

    /// Instances found on disk, used when the database is unavailable
    async fn list_on_disk(&self) -> HiveResult<Vec<InstanceInfo>>;

    /// Start instances that were running before the daemon stopped
    async fn restore(&self) -> HiveResult<()>;

    async fn shutdown(&self, instances: &[InstanceInfo], timeout: Duration) -> HiveResult<()>;
}

#[async_trait]
pub trait StorageManager: Send + Sync {
    /// Mount storage pools and daemon volumes
    async fn startup(&self) -> HiveResult<()>;

    /// Unmount the image and backup volumes used by the daemon itself
    async fn unmount_daemon_volumes(&self) -> HiveResult<()>;

    async fn unmount_pools(&self) -> HiveResult<()>;
}

#[async_trait]
pub trait NetworkManager: Send + Sync {
    async fn startup(&self) -> HiveResult<()>;

    async fn shutdown(&self) -> HiveResult<()>;
}

/// Long-running operations in flight
#[async_trait]
pub trait OperationTracker: Send + Sync {
    /// Wait until no operation is running or the timeout expires
    async fn wait_all(&self, timeout: Duration) -> HiveResult<()>;
}

/// Routing and name-resolution listeners started from cluster settings
#[async_trait]
pub trait AuxiliaryListeners: Send + Sync {
    async fn start_bgp(&self, address: &str) -> HiveResult<()>;

    async fn start_dns(&self, address: &str) -> HiveResult<()>;

    async fn stop(&self) -> HiveResult<()>;
}

/// Transient filesystems mounted under the var directory
pub trait TransientMounts: Send + Sync {
    fn unmount_detached(&self, path: &Path) -> HiveResult<()>;
}
