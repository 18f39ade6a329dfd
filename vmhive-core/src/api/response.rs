//! Response rendering
//!
//! Handlers return an [`ApiResponse`]: something that knows how to render
//! itself. Rendering can fail (serialization), and the dispatcher falls back
//! to an internal error when it does.

use axum::{body::Body, response::Response};
use http::{header, HeaderValue, StatusCode};
use serde::Serialize;

use crate::error::{HiveError, HiveResult};

pub trait Render: Send {
    fn render(self: Box<Self>) -> HiveResult<Response>;
}

pub type ApiResponse = Box<dyn Render>;

#[derive(Serialize)]
struct SyncEnvelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    status: &'static str,
    status_code: u16,
    metadata: &'a T,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    error: &'a str,
    error_code: u16,
}

fn json_response(status: StatusCode, body: Vec<u8>) -> HiveResult<Response> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .body(Body::from(body))
        .map_err(|e| HiveError::internal(format!("failed to build response: {}", e)))
}

/// Successful synchronous result
pub struct SyncResponse<T> {
    metadata: T,
}

impl<T: Serialize + Send> Render for SyncResponse<T> {
    fn render(self: Box<Self>) -> HiveResult<Response> {
        let body = serde_json::to_vec(&SyncEnvelope {
            kind: "sync",
            status: "Success",
            status_code: StatusCode::OK.as_u16(),
            metadata: &self.metadata,
        })?;
        json_response(StatusCode::OK, body)
    }
}

pub struct ErrorResponse {
    status: StatusCode,
    message: String,
}

impl Render for ErrorResponse {
    fn render(self: Box<Self>) -> HiveResult<Response> {
        let body = serde_json::to_vec(&ErrorEnvelope {
            kind: "error",
            error: &self.message,
            error_code: self.status.as_u16(),
        })?;
        json_response(self.status, body)
    }
}

/// Asks the client to acquire a discharge token from the identity service
pub struct ChallengeResponse {
    challenge: serde_json::Value,
}

impl Render for ChallengeResponse {
    fn render(self: Box<Self>) -> HiveResult<Response> {
        let body = serde_json::to_vec(&serde_json::json!({
            "code": "macaroon discharge required",
            "message": "authentication required",
            "info": self.challenge,
        }))?;
        let mut response = json_response(StatusCode::UNAUTHORIZED, body)?;
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Macaroon"));
        Ok(response)
    }
}

pub fn sync<T: Serialize + Send + 'static>(metadata: T) -> ApiResponse {
    Box::new(SyncResponse { metadata })
}

pub fn empty_sync() -> ApiResponse {
    sync(serde_json::json!({}))
}

pub fn error(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    Box::new(ErrorResponse {
        status,
        message: message.into(),
    })
}

pub fn forbidden() -> ApiResponse {
    error(StatusCode::FORBIDDEN, "not authorized")
}

pub fn unavailable(message: impl Into<String>) -> ApiResponse {
    error(StatusCode::SERVICE_UNAVAILABLE, message)
}

pub fn not_found() -> ApiResponse {
    error(StatusCode::NOT_FOUND, "not found")
}

pub fn not_implemented() -> ApiResponse {
    error(StatusCode::NOT_IMPLEMENTED, "not implemented")
}

pub fn internal_error(message: impl Into<String>) -> ApiResponse {
    error(StatusCode::INTERNAL_SERVER_ERROR, message)
}

pub fn challenge(challenge: serde_json::Value) -> ApiResponse {
    Box::new(ChallengeResponse { challenge })
}

/// Map a collaborator error onto the closest status
pub fn from_error(err: &HiveError) -> ApiResponse {
    let status = match err {
        HiveError::NotFound { .. } => StatusCode::NOT_FOUND,
        HiveError::AuthorizationError { .. }
        | HiveError::Authentication { .. }
        | HiveError::Security { .. } => StatusCode::FORBIDDEN,
        HiveError::ConfigurationError { .. } => StatusCode::BAD_REQUEST,
        HiveError::NotInitialized { .. } | HiveError::Cancelled { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error(status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_sync_envelope() {
        let response = sync(vec!["a", "b"]).render().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["type"], "sync");
        assert_eq!(body["status_code"], 200);
        assert_eq!(body["metadata"][1], "b");
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let response = unavailable("Shutting down").render().unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Shutting down");
        assert_eq!(body["error_code"], 503);
    }

    #[tokio::test]
    async fn test_challenge_sets_authenticate_header() {
        let response = challenge(serde_json::json!({"macaroon": "m"})).render().unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Macaroon");
    }

    #[test]
    fn test_error_mapping() {
        let response = from_error(&HiveError::NotFound {
            resource: "instance".into(),
        })
        .render()
        .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
