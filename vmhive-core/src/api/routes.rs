//! Routes the daemon serves itself

use serde::Serialize;

use crate::{
    api::{
        endpoint::{ApiVersion, Endpoint, EndpointAction},
        response,
    },
    lifecycle::ShutdownSignal,
};

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub api_version: &'static str,
    pub auth: &'static str,
    pub auth_methods: Vec<&'static str>,
    pub protocol: Option<String>,
    pub clustered: bool,
    pub server_fingerprint: Option<String>,
}

pub fn builtin_endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new(ApiVersion::Public, "").get(
            EndpointAction::new(|state, ctx, _req| async move {
                let mut auth_methods = vec!["tls"];
                if state.auth().has_external() {
                    auth_methods.push("candid");
                }
                response::sync(ServerInfo {
                    api_version: "1.0",
                    auth: if ctx.trusted { "trusted" } else { "untrusted" },
                    auth_methods,
                    protocol: ctx.protocol().map(|p| p.to_string()),
                    clustered: state.is_clustered(),
                    server_fingerprint: state.server_fingerprint(),
                })
            })
            .allow_untrusted(),
        ),
        Endpoint::new(ApiVersion::Internal, "ready").get(EndpointAction::new(
            |state, _ctx, _req| async move {
                let signals = state.signals();
                if signals.ready.wait_or_cancel(&signals.shutdown).await {
                    response::empty_sync()
                } else {
                    response::unavailable("Daemon is shutting down")
                }
            },
        )),
        Endpoint::new(ApiVersion::Internal, "shutdown").put(EndpointAction::new(
            |state, _ctx, _req| async move {
                if state.request_shutdown(ShutdownSignal::Power) {
                    response::empty_sync()
                } else {
                    response::unavailable("Shutdown already in progress")
                }
            },
        )),
    ]
}
