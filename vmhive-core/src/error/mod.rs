//! Error handling for vmhive
//!
//! All fallible operations in the control plane return [`HiveResult`]. The
//! error taxonomy mirrors how failures are surfaced:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      vmhive Error Taxonomy                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Authentication      │  Availability         │  Bootstrap        │
//! │  • Authentication    │  • NotInitialized     │  • SomeNodesBehind│
//! │  • DischargeRequired │  • Cancelled          │    (recoverable)  │
//! │  • GuestSocket...    │  • Timeout            │  • DatabaseError  │
//! │  • MissingTls        │                       │    (fatal)        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Authorization       │  Heartbeat            │  Shutdown         │
//! │  • Authorization...  │  • NotLeader (silent) │  • Multiple       │
//! │                      │  • ClusterError       │    (aggregated)   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Clients only ever see coarse HTTP status outcomes derived from these
//! variants; the full error chain is logged locally.

pub mod constructors;
pub mod conversions;
pub mod types;

pub use types::{summarize_errors, HiveError, HiveResult};

#[cfg(test)]
mod tests;
