//! Proxy handler: route lookup, body buffering, dispatch.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::http::request::request_id;
use crate::http::response::ErrorResponse;
use crate::http::server::AppState;
use crate::proxy::{CallerIdentity, ProxyRequestContext};

/// Main proxy handler.
/// Looks up the route, buffers the body for retries, and dispatches.
pub async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request_id(request.headers()).unwrap_or_else(|| Uuid::new_v4().to_string());
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let caller = request.extensions().get::<CallerIdentity>().cloned();

    let resolved = state.routes.load().resolve(request.uri());
    let Some(route) = resolved else {
        tracing::warn!(request_id = %request_id, path = %request.uri().path(), "No route matched");
        return ErrorResponse::new(
            GatewayError::NoRoute(request.uri().path().to_string()),
            Some(&request_id),
        )
        .into_response();
    };

    tracing::debug!(
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
        route = %route.route.name,
        service = %route.route.service,
        "Proxying request"
    );

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Failed to read request body");
            let err = if exceeds_limit(&e) {
                GatewayError::PayloadTooLarge {
                    limit: state.max_body_bytes,
                }
            } else {
                GatewayError::InvalidRequest("request body could not be read".to_string())
            };
            return ErrorResponse::new(err, Some(&request_id)).into_response();
        }
    };

    let mut ctx = ProxyRequestContext::new(request_id.clone(), route.route.service.clone())
        .with_session_from(&parts.headers)
        .with_caller(caller)
        .with_client_addr(client_addr);

    match state.dispatcher.dispatch(&mut ctx, &route, parts, body).await {
        Ok(response) => response,
        Err(err) => {
            match &err {
                GatewayError::ServiceNotRegistered(_) => {
                    tracing::error!(request_id = %request_id, error = %err, "Dispatch failed");
                }
                GatewayError::CircuitOpen { .. } | GatewayError::UpstreamClient { .. } => {
                    tracing::debug!(request_id = %request_id, error = %err, "Dispatch failed");
                }
                _ => {
                    tracing::warn!(request_id = %request_id, attempts = ctx.attempt, error = %err, "Dispatch failed");
                }
            }
            ErrorResponse::new(err, Some(&request_id)).into_response()
        }
    }
}

/// True when buffering stopped at the body size limit rather than on a
/// transport error.
fn exceeds_limit(err: &axum::Error) -> bool {
    std::iter::successors(std::error::Error::source(err), |e| e.source())
        .any(|e| e.is::<LengthLimitError>())
}
