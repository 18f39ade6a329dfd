//! Request dispatcher
//!
//! Every registered route funnels through [`dispatch`], which applies the same
//! gates in a fixed order: availability, authentication, internal-route
//! restriction, authorization scope, shutdown, per-route access, then the
//! handler itself. Rejections never reach a handler.

use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn, Instrument, Span};

use crate::{
    api::{
        endpoint::{ApiVersion, Endpoint},
        request::{
            project_from_uri, ConnectionInfo, ForwardedIdentity, RequestContext, HEADER_AUTHENTICATED,
        },
        response::{self, ApiResponse},
    },
    error::HiveError,
    lifecycle::DaemonState,
    observability::{record_duration, request_span},
    types::Protocol,
};

/// The one internal route a trusted TLS client may call, used to join a cluster
pub const CLUSTER_ACCEPT_ENDPOINT: &str = "cluster/accept";

/// Build the router for `endpoints`. Unregistered paths answer 404.
pub fn router(state: DaemonState, endpoints: Vec<Endpoint>) -> Router {
    let mut router = Router::new();

    for endpoint in endpoints {
        let path = endpoint.route_path();
        let endpoint = Arc::new(endpoint);
        let state = state.clone();
        router = router.route(
            &path,
            any(move |req: Request<Body>| {
                let state = state.clone();
                let endpoint = endpoint.clone();
                async move { dispatch(state, &endpoint, req).await }
            }),
        );
    }

    router
        .fallback(|| async { finish(response::not_found()) })
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Run one request through the gating pipeline
pub async fn dispatch(state: DaemonState, endpoint: &Endpoint, req: Request<Body>) -> Response {
    let connection = req
        .extensions()
        .get::<ConnectionInfo>()
        .cloned()
        .unwrap_or(ConnectionInfo::Plain { remote: None });
    let span = request_span(req.method(), req.uri().path(), &connection);

    async move {
        let start = Instant::now();
        let response = finish(gate_and_handle(&state, endpoint, connection, req).await);
        Span::current().record("status", response.status().as_u16());
        record_duration(start);
        response
    }
    .instrument(span)
    .await
}

async fn gate_and_handle(
    state: &DaemonState,
    endpoint: &Endpoint,
    connection: ConnectionInfo,
    req: Request<Body>,
) -> ApiResponse {
    let signals = state.signals();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if !signals.setup_complete.is_set()
        && !(connection.is_unix() && endpoint.version == ApiVersion::Internal)
    {
        return response::unavailable("Daemon setup in progress");
    }

    let outcome = match state.auth().authenticate(&connection, req.headers(), &path).await {
        Ok(outcome) => outcome,
        Err(HiveError::DischargeRequired { challenge }) => {
            debug!("Requesting discharge token from client");
            return response::challenge(challenge);
        }
        Err(err) => {
            warn!(%method, %path, remote = %connection, error = %err, "Rejecting request");
            return response::forbidden();
        }
    };

    if endpoint.version == ApiVersion::Internal
        && !matches!(outcome.protocol, Some(Protocol::Unix) | Some(Protocol::Cluster))
    {
        let joining = outcome.trusted
            && outcome.protocol == Some(Protocol::Tls)
            && endpoint.name == CLUSTER_ACCEPT_ENDPOINT;
        if !joining {
            warn!(
                %method,
                %path,
                remote = %connection,
                username = %outcome.username,
                protocol = ?outcome.protocol,
                "Rejecting internal request"
            );
            return response::forbidden();
        }
    }

    let mut ctx = RequestContext::new(connection, endpoint.version, endpoint.name.clone());
    ctx.project = project_from_uri(req.uri());

    if let Some(identity) = outcome.identity() {
        let scope = match state
            .access()
            .access_scope(&identity.username, identity.protocol)
            .await
        {
            Ok(scope) => scope,
            Err(err) => {
                warn!(
                    %method,
                    %path,
                    remote = %ctx.connection,
                    username = %identity.username,
                    protocol = %identity.protocol,
                    error = %err,
                    "Rejecting request"
                );
                return response::forbidden();
            }
        };

        if identity.protocol == Protocol::Cluster {
            ctx.forwarded = ForwardedIdentity::from_headers(req.headers());
        }
        ctx.trusted = true;
        ctx.identity = Some(identity);
        ctx.access = Some(scope);
    } else if endpoint.allows_untrusted(&method)
        && req
            .headers()
            .get(HEADER_AUTHENTICATED)
            .map_or(true, |v| v.is_empty())
    {
        debug!(%method, %path, remote = %ctx.connection, "Allowing untrusted request");
    } else {
        warn!(%method, %path, remote = %ctx.connection, "Rejecting request from untrusted client");
        return response::forbidden();
    }

    if signals.is_shutting_down() && !allowed_during_shutdown(endpoint, &method) {
        return response::unavailable("Shutting down");
    }

    let action = match endpoint.action(&method) {
        None => return response::not_found(),
        Some(None) => return response::not_implemented(),
        Some(Some(action)) => action,
    };

    if let Some(check) = &action.access {
        if let Err(err) = check(state, &ctx) {
            warn!(
                %method,
                %path,
                remote = %ctx.connection,
                username = ?ctx.username(),
                error = %err,
                "Access denied"
            );
            return response::forbidden();
        }
    } else if !action.allow_untrusted && !state.access().is_admin(ctx.protocol(), ctx.access.as_ref()) {
        warn!(
            %method,
            %path,
            remote = %ctx.connection,
            username = ?ctx.username(),
            "Access denied, admin required"
        );
        return response::forbidden();
    }

    (action.handler)(state.clone(), ctx, req).await
}

fn allowed_during_shutdown(endpoint: &Endpoint, method: &Method) -> bool {
    endpoint.version == ApiVersion::Internal
        || matches!(endpoint.name.as_str(), "" | "events" | "operations")
        || endpoint.name.starts_with("operations/")
        || method == Method::GET
}

fn finish(response: ApiResponse) -> Response {
    match response.render() {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "Failed writing response");
            match response::internal_error(err.to_string()).render() {
                Ok(response) => response,
                Err(err) => {
                    error!(error = %err, "Failed writing error for error, giving up");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
    }
}
