//! Trait abstractions for the daemon's external collaborators
//!
//! The control-plane core never reaches into the replicated database engine,
//! storage drivers, network drivers or identity services directly. It talks to
//! them through the interfaces defined here, which keeps the core testable with
//! in-memory doubles and lets the binary wire in real implementations.

pub mod auth;
pub mod cluster;
pub mod inert;
pub mod subsystems;

pub use auth::*;
pub use cluster::*;
pub use inert::Inert;
pub use subsystems::*;
