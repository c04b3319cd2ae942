//! Response handling and transformation.
//!
//! # Responsibilities
//! - Map gateway errors to client responses
//! - Add gateway headers (X-Gateway-Service, X-Response-Time) to every response
//!
//! # Design Decisions
//! - Upstream 4xx/5xx responses are passed through untouched
//! - Error bodies never carry hostnames or io detail

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::http::server::AppState;

pub const X_RESPONSE_TIME: &str = "x-response-time";

/// Client-facing error body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub service: Option<String>,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub code: &'static str,
}

/// A [`GatewayError`] bound to the request it failed.
#[derive(Debug)]
pub struct ErrorResponse {
    error: GatewayError,
    request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: GatewayError, request_id: Option<&str>) -> Self {
        Self {
            error,
            request_id: request_id.map(str::to_string),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let body = ErrorBody {
            error: self.error.title(),
            message: self.error.public_message(),
            service: self.error.service().map(str::to_string),
            request_id: self.request_id,
            timestamp: Utc::now(),
            code: self.error.code(),
        };

        let retry_after = match &self.error {
            GatewayError::CircuitOpen { retry_after, .. } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };

        match self.error {
            GatewayError::UpstreamClient { response, .. } | GatewayError::UpstreamServer { response, .. } => response,
            _ => {
                let mut response = (status, Json(body)).into_response();
                if let Some(secs) = retry_after {
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                }
                response
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        ErrorResponse::new(self, None).into_response()
    }
}

/// Stamp gateway headers on every response.
pub async fn gateway_headers(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(
        crate::proxy::upstream::X_GATEWAY_SERVICE,
        state.gateway_header.clone(),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("{}ms", started.elapsed().as_millis())) {
        headers.insert(X_RESPONSE_TIME, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::time::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let err = GatewayError::CircuitOpen {
            service: "nlu".into(),
            retry_after: Duration::from_millis(1500),
        };
        let response = ErrorResponse::new(err, Some("req-9")).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");

        let body = body_json(response).await;
        assert_eq!(body["error"], "Service Unavailable");
        assert_eq!(body["service"], "nlu");
        assert_eq!(body["requestId"], "req-9");
        assert_eq!(body["code"], "CIRCUIT_OPEN");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_upstream_response_passes_through() {
        let upstream = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("x-upstream", "yes")
            .body(Body::from("missing account"))
            .unwrap();
        let err = GatewayError::UpstreamClient {
            service: "banking".into(),
            status: StatusCode::NOT_FOUND,
            response: upstream,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-upstream"], "yes");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"missing account");
    }
}
