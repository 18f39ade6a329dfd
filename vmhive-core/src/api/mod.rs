//! HTTP API surface
//!
//! The daemon owns the request pipeline; route handlers come from
//! collaborators and are registered as [`Endpoint`]s.

pub mod dispatcher;
pub mod endpoint;
pub mod request;
pub mod response;
pub mod routes;

pub use dispatcher::{dispatch, router, CLUSTER_ACCEPT_ENDPOINT};
pub use endpoint::{AccessCheck, ApiVersion, Endpoint, EndpointAction, Handler};
pub use request::{ConnectionInfo, ForwardedIdentity, RequestContext};
pub use response::{ApiResponse, Render};
pub use routes::builtin_endpoints;
