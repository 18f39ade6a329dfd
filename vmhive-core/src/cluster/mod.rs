//! Cluster membership: database bootstrap, heartbeat handling and the
//! single-node stand-ins used before a node joins a cluster

pub mod bootstrap;
pub mod heartbeat;
pub mod standalone;

pub use bootstrap::{BootstrapState, ClusterDatabaseBootstrapper};
pub use heartbeat::{has_member_list_changed, HeartbeatCoordinator, HeartbeatReport};
pub use standalone::{LocalClusterDatabase, StandaloneGateway, StandaloneMembership};

/// Schema version this build of the daemon expects
pub const SCHEMA_VERSION: u64 = 1;
/// Number of API extensions this build supports
pub const API_EXTENSIONS: u64 = 1;
