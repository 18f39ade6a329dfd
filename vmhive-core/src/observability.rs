//! Logging setup and span helpers
//!
//! The daemon logs through `tracing`. `RUST_LOG` wins over the configured
//! level so a single run can be made more verbose without editing the
//! config file.

use http::Method;
use std::time::Instant;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::{
    api::ConnectionInfo,
    config::LoggingConfig,
    error::{HiveError, HiveResult},
};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> HiveResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(&config.level)))
        .map_err(|e| HiveError::configuration("logging.level", e.to_string()))?;

    let registry = Registry::default().with(env_filter);
    let result = if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    };

    result.map_err(|e| HiveError::internal(format!("failed to install tracing subscriber: {}", e)))
}

fn default_directives(level: &str) -> String {
    format!("{level},vmhive_core={level},hyper=info,tower_http=info,redb=info")
}

/// Span for one API request
#[inline]
pub fn request_span(method: &Method, path: &str, connection: &ConnectionInfo) -> Span {
    tracing::info_span!(
        "request",
        method = %method,
        path = %path,
        remote = %connection,
        status = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Span for one heartbeat tick
#[inline]
pub fn heartbeat_span(members: usize, is_leader: bool) -> Span {
    tracing::debug_span!(
        "heartbeat",
        members,
        is_leader,
        duration_ms = tracing::field::Empty,
    )
}

/// Record the duration of an operation in the current span
pub fn record_duration(start: Instant) {
    Span::current().record("duration_ms", start.elapsed().as_millis() as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_default_directives_follow_level() {
        let directives = default_directives("warn");
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("vmhive_core=warn"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[traced_test]
    #[test]
    fn test_request_span_fields() {
        let connection = ConnectionInfo::Unix {
            uid: Some(0),
            pid: Some(42),
        };
        let span = request_span(&Method::GET, "/1.0", &connection);
        let _guard = span.enter();
        record_duration(Instant::now());
        tracing::info!("handled");

        assert!(logs_contain("request"));
        assert!(logs_contain("path=/1.0"));
        assert!(logs_contain("handled"));
    }
}
