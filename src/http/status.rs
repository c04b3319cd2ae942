//! Health and metrics endpoints served by the gateway itself.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::http::server::AppState;
use crate::observability::metrics::MetricsSnapshot;
use crate::resilience::circuit_breaker::BreakerSnapshot;

/// Gateway process health. Turns 503 once shutdown has begun so load
/// balancers drain traffic away.
pub async fn health(State(state): State<AppState>) -> Response {
    if state.shutdown.is_triggered() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "shutting_down",
                "service": state.gateway,
                "timestamp": Utc::now(),
            })),
        )
            .into_response();
    }
    Json(json!({
        "status": "healthy",
        "service": state.gateway,
        "timestamp": Utc::now(),
    }))
    .into_response()
}

/// Liveness never looks at backends.
pub async fn live() -> Json<serde_json::Value> {
    Json(json!({
        "status": "alive",
        "timestamp": Utc::now(),
    }))
}

pub async fn ready(State(state): State<AppState>) -> Response {
    let readiness = state.health.readiness().await;
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness)).into_response()
}

pub async fn services(State(state): State<AppState>) -> Response {
    let aggregate = state.health.check_services().await;
    let status = if aggregate.any_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(aggregate)).into_response()
}

#[derive(Serialize)]
pub struct MetricsView {
    #[serde(flatten)]
    pub requests: MetricsSnapshot,
    pub breakers: Vec<BreakerSnapshot>,
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsView> {
    Json(MetricsView {
        requests: state.metrics.snapshot(),
        breakers: state.breakers.snapshot(),
    })
}

pub async fn metrics_prometheus(State(state): State<AppState>) -> Response {
    let body = state.prometheus.render();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

pub async fn metrics_reset(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.metrics.reset();
    Json(json!({
        "status": "reset",
        "timestamp": Utc::now(),
    }))
}
