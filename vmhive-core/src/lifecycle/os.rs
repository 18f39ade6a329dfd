//! Host capability detection and transient mounts

use nix::mount::{umount2, MntFlags};
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{abstractions::TransientMounts, error::HiveResult};

/// Mount points under the var dir that only exist while the daemon runs
pub const TRANSIENT_MOUNTS: [&str; 2] = ["guestapi", "shmounts"];

const CGROUP2_CONTROLLERS: &str = "/sys/fs/cgroup/cgroup.controllers";

#[derive(Debug, Clone, Default, Serialize)]
pub struct Capabilities {
    pub kernel_release: Option<String>,
    pub cgroup_v2: bool,
    /// Soft open-files limit after the raise attempt
    pub open_files_limit: Option<u64>,
    pub unprivileged: bool,
    /// Probes that failed; none of them stop the daemon
    pub detection_errors: Vec<String>,
}

/// Probe the host. Failures are logged and recorded.
pub fn detect() -> Capabilities {
    let mut caps = Capabilities {
        cgroup_v2: Path::new(CGROUP2_CONTROLLERS).exists(),
        unprivileged: !nix::unistd::Uid::effective().is_root(),
        ..Capabilities::default()
    };

    match nix::sys::utsname::uname() {
        Ok(uts) => caps.kernel_release = Some(uts.release().to_string_lossy().into_owned()),
        Err(e) => caps.detection_errors.push(format!("uname: {}", e)),
    }

    match raise_open_files_limit() {
        Ok(limit) => caps.open_files_limit = Some(limit),
        Err(e) => caps.detection_errors.push(format!("RLIMIT_NOFILE: {}", e)),
    }

    for error in &caps.detection_errors {
        warn!(error = %error, "Capability check failed");
    }
    info!(
        kernel = caps.kernel_release.as_deref().unwrap_or("unknown"),
        cgroup_v2 = caps.cgroup_v2,
        open_files = ?caps.open_files_limit,
        unprivileged = caps.unprivileged,
        "Detected host capabilities"
    );
    caps
}

fn raise_open_files_limit() -> nix::Result<u64> {
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;
    if soft < hard {
        setrlimit(Resource::RLIMIT_NOFILE, hard, hard)?;
        debug!(from = soft, to = hard, "Raised open files limit");
        return Ok(hard as u64);
    }
    Ok(soft as u64)
}

/// Open `path` for the duration of a shutdown step. `None` means skip the step.
pub fn open_scoped(path: &Path) -> Option<File> {
    match File::open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Skipping unopenable path");
            None
        }
    }
}

pub fn transient_mount_paths(var_dir: &Path) -> Vec<PathBuf> {
    TRANSIENT_MOUNTS.iter().map(|name| var_dir.join(name)).collect()
}

/// Lazily detaches mounts with `umount2(MNT_DETACH)`
#[derive(Debug, Default)]
pub struct LinuxTransientMounts;

impl TransientMounts for LinuxTransientMounts {
    fn unmount_detached(&self, path: &Path) -> HiveResult<()> {
        umount2(path, MntFlags::MNT_DETACH)?;
        info!(path = %path.display(), "Unmounted");
        Ok(())
    }
}
