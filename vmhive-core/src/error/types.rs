//! Core error types for vmhive
//!
//! This module contains the main HiveError enum with all error variants
//! and associated type aliases for Result types.

use thiserror::Error;

/// Error type for every vmhive control-plane operation
///
/// Variants carry the operation or component that failed so logs stay
/// actionable. A few variants are not failures in the usual sense and are
/// special-cased by callers:
///
/// - [`HiveError::DischargeRequired`] turns into an authentication challenge.
/// - [`HiveError::SomeNodesBehind`] puts the bootstrapper into degraded mode.
/// - [`HiveError::NotLeader`] is swallowed by the heartbeat coordinator.
#[derive(Error, Debug)]
pub enum HiveError {
    // Storage Errors
    #[error("Storage operation '{operation}' failed")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Database error: {operation} failed")]
    DatabaseError {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization operation '{operation}' failed")]
    Serialization {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // Serialization & IO Errors
    #[error("JSON error: {0}")]
    JsonError(#[from] Box<serde_json::Error>),

    #[error("IO error: {0}")]
    IoError(#[from] Box<std::io::Error>),

    #[error("System error: {0}")]
    SystemError(String),

    // Configuration Errors
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    // Authentication
    #[error("Security error: {message}")]
    Security { message: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Discharge required from external identity service")]
    DischargeRequired { challenge: serde_json::Value },

    #[error("Cluster notification isn't using trusted server certificate")]
    UntrustedClusterNotification,

    #[error("Main API query can't come from the guest socket")]
    GuestSocketRejected,

    #[error("Bad/missing TLS on network query")]
    MissingTls,

    // Authorization
    #[error("Authorization error: {message}")]
    AuthorizationError { message: String },

    // Cluster & Bootstrap
    #[error("Some cluster members are behind this member's version: {details}")]
    SomeNodesBehind { details: String },

    #[error("Not leader for operation '{operation}'")]
    NotLeader { operation: String },

    #[error("Cluster error: {0}")]
    ClusterError(String),

    // Operational Errors
    #[error("Not initialized: {component}")]
    NotInitialized { component: String },

    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    #[error("Operation '{operation}' cancelled by shutdown")]
    Cancelled { operation: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    // Multiple Errors
    #[error("{}", summarize_errors(.errors))]
    Multiple {
        context: String,
        errors: Vec<HiveError>,
    },
}

/// Render a list of errors as the first one plus a count of the rest
pub fn summarize_errors(errors: &[HiveError]) -> String {
    match errors {
        [] => "no errors".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more errors)", first, rest.len()),
    }
}

pub type HiveResult<T> = std::result::Result<T, HiveError>;
