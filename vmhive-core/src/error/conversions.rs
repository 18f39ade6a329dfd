//! Error conversion implementations for HiveError
//!
//! This module provides From trait implementations for converting
//! external error types into HiveError variants.

use super::types::HiveError;

// Storage error conversions
impl From<redb::TransactionError> for HiveError {
    fn from(err: redb::TransactionError) -> Self {
        HiveError::storage("transaction", err)
    }
}

impl From<redb::TableError> for HiveError {
    fn from(err: redb::TableError) -> Self {
        HiveError::storage("open_table", err)
    }
}

impl From<redb::StorageError> for HiveError {
    fn from(err: redb::StorageError) -> Self {
        HiveError::storage("storage_operation", err)
    }
}

impl From<redb::DatabaseError> for HiveError {
    fn from(err: redb::DatabaseError) -> Self {
        HiveError::database("database_operation", err)
    }
}

impl From<redb::CommitError> for HiveError {
    fn from(err: redb::CommitError) -> Self {
        HiveError::storage("commit", err)
    }
}

// Serialization error conversions
impl From<bincode::Error> for HiveError {
    fn from(err: bincode::Error) -> Self {
        HiveError::serialization("bincode", err)
    }
}

impl From<serde_json::Error> for HiveError {
    fn from(err: serde_json::Error) -> Self {
        HiveError::JsonError(Box::new(err))
    }
}

impl From<toml::de::Error> for HiveError {
    fn from(err: toml::de::Error) -> Self {
        HiveError::configuration("toml", err.to_string())
    }
}

// System error conversions
impl From<std::io::Error> for HiveError {
    fn from(err: std::io::Error) -> Self {
        HiveError::IoError(Box::new(err))
    }
}

impl From<nix::Error> for HiveError {
    fn from(err: nix::Error) -> Self {
        HiveError::SystemError(err.to_string())
    }
}

// Certificate and TLS conversions
impl From<rcgen::RcgenError> for HiveError {
    fn from(err: rcgen::RcgenError) -> Self {
        HiveError::security(format!("certificate generation failed: {}", err))
    }
}

impl From<pem::PemError> for HiveError {
    fn from(err: pem::PemError) -> Self {
        HiveError::security(format!("invalid PEM data: {}", err))
    }
}

impl From<rustls::Error> for HiveError {
    fn from(err: rustls::Error) -> Self {
        HiveError::security(format!("TLS configuration failed: {}", err))
    }
}

impl From<x509_parser::nom::Err<x509_parser::error::X509Error>> for HiveError {
    fn from(err: x509_parser::nom::Err<x509_parser::error::X509Error>) -> Self {
        HiveError::security(format!("invalid X.509 certificate: {}", err))
    }
}

// Async runtime conversions
impl From<tokio::task::JoinError> for HiveError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            HiveError::internal("Task was cancelled")
        } else if err.is_panic() {
            HiveError::internal("Task panicked")
        } else {
            HiveError::internal(format!("Task join failed: {}", err))
        }
    }
}
