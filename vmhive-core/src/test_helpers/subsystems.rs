use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use super::EventLog;
use crate::{
    abstractions::{
        AuxiliaryListeners, InstanceManager, NetworkManager, OperationTracker, StorageManager,
        TransientMounts,
    },
    error::{HiveError, HiveResult},
    types::InstanceInfo,
};

/// One double for every subsystem trait. Each call is appended to the shared
/// [`EventLog`] under a stable name such as `storage.unmount_pools`; steps
/// can be told to fail or to hang forever.
#[derive(Default)]
pub struct RecordingSubsystems {
    log: EventLog,
    instances: Mutex<Vec<InstanceInfo>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
}

impl RecordingSubsystems {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn set_instances(&self, instances: Vec<InstanceInfo>) {
        *self.instances.lock() = instances;
    }

    pub fn instances(&self) -> Vec<InstanceInfo> {
        self.instances.lock().clone()
    }

    pub fn fail(&self, step: &str) {
        self.failing.lock().insert(step.to_string());
    }

    pub fn hang(&self, step: &str) {
        self.hanging.lock().insert(step.to_string());
    }

    fn check(&self, step: &str) -> HiveResult<()> {
        self.log.push(step);
        if self.failing.lock().contains(step) {
            return Err(HiveError::internal(format!("{} failed", step)));
        }
        Ok(())
    }

    async fn step(&self, step: &str) -> HiveResult<()> {
        self.check(step)?;
        let hangs = self.hanging.lock().contains(step);
        if hangs {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[async_trait]
impl InstanceManager for RecordingSubsystems {
    async fn list_local(&self) -> HiveResult<Vec<InstanceInfo>> {
        self.step("instances.list_local").await?;
        Ok(self.instances())
    }

    async fn list_on_disk(&self) -> HiveResult<Vec<InstanceInfo>> {
        self.step("instances.list_on_disk").await?;
        Ok(self.instances())
    }

    async fn restore(&self) -> HiveResult<()> {
        self.step("instances.restore").await
    }

    async fn shutdown(&self, instances: &[InstanceInfo], _timeout: Duration) -> HiveResult<()> {
        self.step("instances.shutdown").await?;
        let names: HashSet<&str> = instances.iter().map(|i| i.name.as_str()).collect();
        for instance in self.instances.lock().iter_mut() {
            if names.contains(instance.name.as_str()) {
                instance.running = false;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageManager for RecordingSubsystems {
    async fn startup(&self) -> HiveResult<()> {
        self.step("storage.startup").await
    }

    async fn unmount_daemon_volumes(&self) -> HiveResult<()> {
        self.step("storage.unmount_volumes").await
    }

    async fn unmount_pools(&self) -> HiveResult<()> {
        self.step("storage.unmount_pools").await
    }
}

#[async_trait]
impl NetworkManager for RecordingSubsystems {
    async fn startup(&self) -> HiveResult<()> {
        self.step("networks.startup").await
    }

    async fn shutdown(&self) -> HiveResult<()> {
        self.step("networks.shutdown").await
    }
}

#[async_trait]
impl OperationTracker for RecordingSubsystems {
    async fn wait_all(&self, _timeout: Duration) -> HiveResult<()> {
        self.step("operations.wait").await
    }
}

#[async_trait]
impl AuxiliaryListeners for RecordingSubsystems {
    async fn start_bgp(&self, _address: &str) -> HiveResult<()> {
        self.step("aux.bgp").await
    }

    async fn start_dns(&self, _address: &str) -> HiveResult<()> {
        self.step("aux.dns").await
    }

    async fn stop(&self) -> HiveResult<()> {
        self.step("aux.stop").await
    }
}

impl TransientMounts for RecordingSubsystems {
    fn unmount_detached(&self, path: &Path) -> HiveResult<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.check(&format!("mounts.unmount:{}", name))
    }
}
