//! Route registrations

use axum::{body::Body, http::Request};
use futures::future::BoxFuture;
use http::Method;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

use crate::{
    api::{request::RequestContext, response::ApiResponse},
    error::{HiveError, HiveResult},
    lifecycle::DaemonState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    /// `/1.0`
    Public,
    /// `/internal`, restricted to the control socket and cluster members
    Internal,
}

impl ApiVersion {
    pub fn prefix(&self) -> &'static str {
        match self {
            ApiVersion::Public => "/1.0",
            ApiVersion::Internal => "/internal",
        }
    }
}

pub type Handler =
    Arc<dyn Fn(DaemonState, RequestContext, Request<Body>) -> BoxFuture<'static, ApiResponse> + Send + Sync>;

/// Custom per-route access rule; an error rejects the request
pub type AccessCheck = Arc<dyn Fn(&DaemonState, &RequestContext) -> HiveResult<()> + Send + Sync>;

#[derive(Clone)]
pub struct EndpointAction {
    pub(crate) handler: Handler,
    pub(crate) access: Option<AccessCheck>,
    pub(crate) allow_untrusted: bool,
}

impl EndpointAction {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(DaemonState, RequestContext, Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResponse> + Send + 'static,
    {
        let handler: Handler = Arc::new(
            move |state: DaemonState, ctx: RequestContext, req: Request<Body>| -> BoxFuture<'static, ApiResponse> {
                Box::pin(handler(state, ctx, req))
            },
        );
        Self {
            handler,
            access: None,
            allow_untrusted: false,
        }
    }

    pub fn allow_untrusted(mut self) -> Self {
        self.allow_untrusted = true;
        self
    }

    pub fn access<F>(mut self, check: F) -> Self
    where
        F: Fn(&DaemonState, &RequestContext) -> HiveResult<()> + Send + Sync + 'static,
    {
        self.access = Some(Arc::new(check));
        self
    }

    /// Any trusted caller may use this action
    pub fn allow_authenticated(self) -> Self {
        self.access(|_state, ctx| {
            if ctx.trusted {
                Ok(())
            } else {
                Err(HiveError::authorization("not authorized"))
            }
        })
    }

    /// Admins, or callers holding `permission` on the request's project
    pub fn allow_project_permission(self, permission: impl Into<String>) -> Self {
        let permission = permission.into();
        self.access(move |state, ctx| {
            if state.access().is_admin(ctx.protocol(), ctx.access.as_ref()) {
                return Ok(());
            }
            let allowed = ctx
                .access
                .as_ref()
                .map_or(false, |scope| scope.has_permission(&ctx.project, &permission));
            if allowed {
                Ok(())
            } else {
                Err(HiveError::authorization(format!(
                    "missing {} permission on project {}",
                    permission, ctx.project
                )))
            }
        })
    }
}

/// One path with an action slot per method. An empty slot answers 501.
#[derive(Clone)]
pub struct Endpoint {
    /// Path below the version prefix in router syntax, `""` for the prefix itself
    pub name: String,
    pub version: ApiVersion,
    pub get: Option<EndpointAction>,
    pub put: Option<EndpointAction>,
    pub post: Option<EndpointAction>,
    pub delete: Option<EndpointAction>,
    pub patch: Option<EndpointAction>,
}

impl Endpoint {
    pub fn new(version: ApiVersion, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version,
            get: None,
            put: None,
            post: None,
            delete: None,
            patch: None,
        }
    }

    pub fn get(mut self, action: EndpointAction) -> Self {
        self.get = Some(action);
        self
    }

    pub fn put(mut self, action: EndpointAction) -> Self {
        self.put = Some(action);
        self
    }

    pub fn post(mut self, action: EndpointAction) -> Self {
        self.post = Some(action);
        self
    }

    pub fn delete(mut self, action: EndpointAction) -> Self {
        self.delete = Some(action);
        self
    }

    pub fn patch(mut self, action: EndpointAction) -> Self {
        self.patch = Some(action);
        self
    }

    pub fn route_path(&self) -> String {
        if self.name.is_empty() {
            self.version.prefix().to_string()
        } else {
            format!("{}/{}", self.version.prefix(), self.name)
        }
    }

    /// Outer `None` for methods the API does not know at all
    pub fn action(&self, method: &Method) -> Option<Option<&EndpointAction>> {
        let slot = match *method {
            Method::GET => &self.get,
            Method::PUT => &self.put,
            Method::POST => &self.post,
            Method::DELETE => &self.delete,
            Method::PATCH => &self.patch,
            _ => return None,
        };
        Some(slot.as_ref())
    }

    pub fn allows_untrusted(&self, method: &Method) -> bool {
        matches!(self.action(method), Some(Some(action)) if action.allow_untrusted)
    }
}
