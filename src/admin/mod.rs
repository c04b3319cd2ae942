//! Admin API: registry management, breaker inspection, metrics reset.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;
use crate::http::status::metrics_reset;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/services", get(get_services))
        .route("/admin/services/{service}", delete(remove_service))
        .route("/admin/services/{service}/instances", post(register_instance))
        .route(
            "/admin/services/{service}/instances/{host}/{port}",
            delete(deregister_instance),
        )
        .route("/admin/breakers", get(get_breakers))
        .route("/metrics/reset", post(metrics_reset))
        .layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
