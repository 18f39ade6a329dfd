//! External identity and authorization services

use async_trait::async_trait;
use http::HeaderMap;

use crate::{config::ExternalAuthSettings, error::HiveResult, types::AccessScope};

/// Identity asserted by the external service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub username: String,
    pub domain: Option<String>,
}

/// Discharge-token identity service
#[async_trait]
pub trait ExternalAuthenticator: Send + Sync {
    async fn configure(&self, settings: &ExternalAuthSettings) -> HiveResult<()>;

    /// Verify the tokens carried by a request.
    ///
    /// Returns [`HiveError::DischargeRequired`](crate::error::HiveError::DischargeRequired)
    /// with a challenge when the client must first obtain a discharge.
    async fn authenticate(&self, headers: &HeaderMap, path: &str) -> HiveResult<ExternalIdentity>;
}

/// Role-based authorization service
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    async fn configure(&self, api_url: &str) -> HiveResult<()>;

    async fn user_access(&self, username: &str) -> HiveResult<AccessScope>;
}
