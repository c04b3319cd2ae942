//! Gateway error taxonomy.
//!
//! Every failure on the dispatch path resolves to a [`GatewayError`]. The
//! variant decides the client-facing status and the stable `code` string;
//! internal detail (instance addresses, io errors) is only ever logged.

use std::fmt;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable codes for network-level upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkErrorCode {
    #[serde(rename = "ECONNREFUSED")]
    ConnectionRefused,
    #[serde(rename = "ECONNRESET")]
    ConnectionReset,
    #[serde(rename = "ETIMEDOUT")]
    TimedOut,
    #[serde(rename = "ENOTFOUND")]
    DnsFailure,
    #[serde(rename = "EUPSTREAM")]
    Other,
}

impl NetworkErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkErrorCode::ConnectionRefused => "ECONNREFUSED",
            NetworkErrorCode::ConnectionReset => "ECONNRESET",
            NetworkErrorCode::TimedOut => "ETIMEDOUT",
            NetworkErrorCode::DnsFailure => "ENOTFOUND",
            NetworkErrorCode::Other => "EUPSTREAM",
        }
    }

    /// Client-facing status for a request that finally failed with this code.
    pub fn status(&self) -> StatusCode {
        match self {
            NetworkErrorCode::ConnectionRefused => StatusCode::SERVICE_UNAVAILABLE,
            NetworkErrorCode::TimedOut => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl fmt::Display for NetworkErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a proxied request as seen by the caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("service `{0}` is not registered")]
    ServiceNotRegistered(String),

    #[error("no healthy instance available for service `{0}`")]
    NoHealthyInstance(String),

    #[error("circuit open for service `{service}`")]
    CircuitOpen { service: String, retry_after: Duration },

    #[error("network error talking to `{service}`: {code} ({detail})")]
    Network {
        service: String,
        code: NetworkErrorCode,
        detail: String,
    },

    #[error("upstream `{service}` timed out")]
    Timeout { service: String },

    /// 4xx from the backend, passed through verbatim.
    #[error("upstream `{service}` answered {status}")]
    UpstreamClient {
        service: String,
        status: StatusCode,
        response: Response<Body>,
    },

    /// 5xx from the backend once retries are exhausted, passed through verbatim.
    #[error("upstream `{service}` failed with {status}")]
    UpstreamServer {
        service: String,
        status: StatusCode,
        response: Response<Body>,
    },

    #[error("no route matches `{0}`")]
    NoRoute(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::ServiceNotRegistered(_) => StatusCode::BAD_GATEWAY,
            GatewayError::NoHealthyInstance(_) | GatewayError::CircuitOpen { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Network { code, .. } => code.status(),
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamClient { status, .. }
            | GatewayError::UpstreamServer { status, .. } => *status,
            GatewayError::NoRoute(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Stable machine-readable code used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::ServiceNotRegistered(_) => "SERVICE_NOT_REGISTERED",
            GatewayError::NoHealthyInstance(_) => "NO_HEALTHY_INSTANCE",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            GatewayError::Network { code, .. } => code.as_str(),
            GatewayError::Timeout { .. } => "ETIMEDOUT",
            GatewayError::UpstreamClient { .. } => "UPSTREAM_CLIENT_ERROR",
            GatewayError::UpstreamServer { .. } => "UPSTREAM_SERVER_ERROR",
            GatewayError::NoRoute(_) => "ROUTE_NOT_FOUND",
            GatewayError::InvalidRequest(_) => "INVALID_REQUEST",
            GatewayError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
        }
    }

    /// Short error title for the client body.
    pub fn title(&self) -> &'static str {
        match self.status() {
            StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
            StatusCode::GATEWAY_TIMEOUT => "Gateway Timeout",
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::PAYLOAD_TOO_LARGE => "Payload Too Large",
            _ => "Bad Gateway",
        }
    }

    /// Client-safe message. Never includes hostnames or io detail.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::ServiceNotRegistered(_) => {
                "The requested service is not available on this gateway".to_string()
            }
            GatewayError::NoHealthyInstance(_) => {
                "No healthy instance of the service is currently available".to_string()
            }
            GatewayError::CircuitOpen { retry_after, .. } => format!(
                "The service is temporarily unavailable, retry in {}s",
                retry_after.as_secs().max(1)
            ),
            GatewayError::Network { code, .. } => match code {
                NetworkErrorCode::ConnectionRefused => {
                    "The service refused the connection".to_string()
                }
                _ => "The service could not be reached".to_string(),
            },
            GatewayError::Timeout { .. } => "The service did not respond in time".to_string(),
            GatewayError::UpstreamClient { .. } | GatewayError::UpstreamServer { .. } => {
                "The service returned an error".to_string()
            }
            GatewayError::NoRoute(_) => "No route matches the requested path".to_string(),
            GatewayError::InvalidRequest(reason) => reason.clone(),
            GatewayError::PayloadTooLarge { limit } => {
                format!("Request body exceeds the {} byte limit", limit)
            }
        }
    }

    /// Service name the error relates to, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            GatewayError::ServiceNotRegistered(s) | GatewayError::NoHealthyInstance(s) => Some(s),
            GatewayError::CircuitOpen { service, .. }
            | GatewayError::Network { service, .. }
            | GatewayError::Timeout { service }
            | GatewayError::UpstreamClient { service, .. }
            | GatewayError::UpstreamServer { service, .. } => Some(service),
            GatewayError::NoRoute(_)
            | GatewayError::InvalidRequest(_)
            | GatewayError::PayloadTooLarge { .. } => None,
        }
    }
}
