//! Control plane of a vmhive node
//!
//! The daemon owns node startup and shutdown, authenticates and dispatches
//! API requests, bootstraps the replicated cluster database and reacts to
//! cluster heartbeats. Instances, storage, networks and the consensus layer
//! are driven through the traits in [`abstractions`].

pub mod abstractions;
pub mod api;
pub mod certs;
pub mod cluster;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod storage;
pub mod tasks;
pub mod types;

// Test helpers are exposed for integration tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::DaemonConfig;
pub use error::{HiveError, HiveResult};
pub use lifecycle::{Collaborators, Daemon, DaemonState, ShutdownSignal};
