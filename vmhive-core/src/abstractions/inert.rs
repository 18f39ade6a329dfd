//! Inert collaborator used when a subsystem is not wired in
//!
//! Every operation succeeds without side effects and listings are empty.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::subsystems::*;
use crate::{error::HiveResult, types::InstanceInfo};

#[derive(Debug, Clone, Copy, Default)]
pub struct Inert;

#[async_trait]
impl InstanceManager for Inert {
    async fn list_local(&self) -> HiveResult<Vec<InstanceInfo>> {
        Ok(Vec::new())
    }

    async fn list_on_disk(&self) -> HiveResult<Vec<InstanceInfo>> {
        Ok(Vec::new())
    }

    async fn restore(&self) -> HiveResult<()> {
        Ok(())
    }

    async fn shutdown(&self, _instances: &[InstanceInfo], _timeout: Duration) -> HiveResult<()> {
        Ok(())
    }
}

#[async_trait]
impl StorageManager for Inert {
    async fn startup(&self) -> HiveResult<()> {
        Ok(())
    }

    async fn unmount_daemon_volumes(&self) -> HiveResult<()> {
        Ok(())
    }

    async fn unmount_pools(&self) -> HiveResult<()> {
        Ok(())
    }
}

#[async_trait]
impl NetworkManager for Inert {
    async fn startup(&self) -> HiveResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> HiveResult<()> {
        Ok(())
    }
}

#[async_trait]
impl OperationTracker for Inert {
    async fn wait_all(&self, _timeout: Duration) -> HiveResult<()> {
        Ok(())
    }
}

#[async_trait]
impl AuxiliaryListeners for Inert {
    async fn start_bgp(&self, address: &str) -> HiveResult<()> {
        debug!(address, "No BGP listener wired in");
        Ok(())
    }

    async fn start_dns(&self, address: &str) -> HiveResult<()> {
        debug!(address, "No DNS listener wired in");
        Ok(())
    }

    async fn stop(&self) -> HiveResult<()> {
        Ok(())
    }
}

impl TransientMounts for Inert {
    fn unmount_detached(&self, _path: &Path) -> HiveResult<()> {
        Ok(())
    }
}
