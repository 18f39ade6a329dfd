//! Request authentication and authorization
//!
//! - [`TrustStore`] holds the trusted certificate sets.
//! - [`AuthenticationGate`] classifies a request into trusted identity or not.
//! - [`AccessController`] turns a trusted identity into an [`AccessScope`](crate::types::AccessScope).

pub mod access;
pub mod authentication;
pub mod trust_store;

pub use access::{AccessController, RESTRICTED_PERMISSIONS};
pub use authentication::{AuthOutcome, AuthenticationGate, CaPolicy};
pub use trust_store::{CertificateSet, TrustStore};
