//! Request handling.
//!
//! # Responsibilities
//! - Attach the request ID (generated when absent) as early as possible
//! - Lift caller identity asserted by the upstream auth layer into a typed
//!   extension
//!
//! # Design Decisions
//! - Identity headers are only trusted when `identity.trust_headers` is set;
//!   the forwarder drops inbound `X-User-*` headers and re-adds them from the
//!   extension, so an untrusted client cannot inject them

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;
use crate::proxy::context::CallerIdentity;
use crate::proxy::upstream::{X_REQUEST_ID, X_USER_ID, X_USER_ROLE};

/// Request ID set by the request-id layer, if any.
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn caller_from_headers(headers: &HeaderMap) -> Option<CallerIdentity> {
    let user_id = headers
        .get(X_USER_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())?;
    let role = headers
        .get(X_USER_ROLE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    Some(CallerIdentity {
        user_id: user_id.to_string(),
        role,
    })
}

pub async fn caller_identity(State(state): State<AppState>, mut request: Request<Body>, next: Next) -> Response {
    if state.trust_identity_headers {
        if let Some(caller) = caller_from_headers(request.headers()) {
            request.extensions_mut().insert(caller);
        }
    }
    next.run(request).await
}
