use async_trait::async_trait;
use http::HeaderMap;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::{
    abstractions::{AuthorizationService, ExternalAuthenticator, ExternalIdentity},
    config::ExternalAuthSettings,
    error::{HiveError, HiveResult},
    types::AccessScope,
};

/// External authenticator with a fixed answer
pub struct StaticExternalAuth {
    outcome: Result<ExternalIdentity, serde_json::Value>,
    delay: Option<Duration>,
}

impl StaticExternalAuth {
    pub fn ok(identity: ExternalIdentity) -> Self {
        Self {
            outcome: Ok(identity),
            delay: None,
        }
    }

    pub fn discharge() -> Self {
        Self {
            outcome: Err(serde_json::json!({ "macaroon": "test-challenge" })),
            delay: None,
        }
    }

    /// Answers only after `delay`, for cancellation tests
    pub fn slow(identity: ExternalIdentity, delay: Duration) -> Self {
        Self {
            outcome: Ok(identity),
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl ExternalAuthenticator for StaticExternalAuth {
    async fn configure(&self, _settings: &ExternalAuthSettings) -> HiveResult<()> {
        Ok(())
    }

    async fn authenticate(&self, _headers: &HeaderMap, _path: &str) -> HiveResult<ExternalIdentity> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.outcome {
            Ok(identity) => Ok(identity.clone()),
            Err(challenge) => Err(HiveError::DischargeRequired {
                challenge: challenge.clone(),
            }),
        }
    }
}

/// Authorization service with a fixed scope, or one that always fails
pub struct StaticAuthorization {
    scope: Option<AccessScope>,
}

impl StaticAuthorization {
    pub fn failing() -> Self {
        Self { scope: None }
    }

    pub fn admin() -> Self {
        Self {
            scope: Some(AccessScope::admin()),
        }
    }

    pub fn project(project: &str, permission: &str) -> Self {
        let permissions = BTreeSet::from([permission.to_string()]);
        Self {
            scope: Some(AccessScope {
                is_admin: false,
                project_permissions: BTreeMap::from([(project.to_string(), permissions)]),
            }),
        }
    }
}

#[async_trait]
impl AuthorizationService for StaticAuthorization {
    async fn configure(&self, _api_url: &str) -> HiveResult<()> {
        Ok(())
    }

    async fn user_access(&self, _username: &str) -> HiveResult<AccessScope> {
        self.scope
            .clone()
            .ok_or_else(|| HiveError::internal("authorization service unreachable"))
    }
}
