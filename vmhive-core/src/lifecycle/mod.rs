//! Daemon lifecycle
//!
//! [`Daemon::start`] brings subsystems up in dependency order and
//! [`Daemon::stop`] takes them down again; [`DaemonState`] is the shared
//! handle the rest of the daemon reads through while it runs.

pub mod daemon;
pub mod os;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use daemon::{Collaborators, Daemon};
pub use os::Capabilities;
pub use shutdown::ShutdownSignal;
pub use signals::{Latch, LifecycleSignals};
pub use state::DaemonState;
