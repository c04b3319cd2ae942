//! Per-request dispatch context.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use tokio::time::Instant;

pub const X_SESSION_ID: &str = "x-session-id";

/// Identity asserted by the upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub role: Option<String>,
}

/// State carried through one proxied request and its retries.
#[derive(Debug, Clone)]
pub struct ProxyRequestContext {
    pub request_id: String,
    pub session_id: Option<String>,
    pub target_service: String,
    /// Attempts made so far; never exceeds `max_retries + 1`.
    pub attempt: u32,
    pub started_at: Instant,
    pub caller: Option<CallerIdentity>,
    pub client_addr: Option<SocketAddr>,
}

impl ProxyRequestContext {
    pub fn new(request_id: impl Into<String>, target_service: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            session_id: None,
            target_service: target_service.into(),
            attempt: 0,
            started_at: Instant::now(),
            caller: None,
            client_addr: None,
        }
    }

    pub fn with_session_from(mut self, headers: &HeaderMap) -> Self {
        self.session_id = headers
            .get(X_SESSION_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self
    }

    pub fn with_caller(mut self, caller: Option<CallerIdentity>) -> Self {
        self.caller = caller;
        self
    }

    pub fn with_client_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.client_addr = addr;
        self
    }
}
