use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::http::server::AppState;
use crate::registry::{InstanceSnapshot, RegistryError, ServiceSnapshot};
use crate::resilience::circuit_breaker::BreakerSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub gateway: String,
    pub services: usize,
    pub routes: usize,
    pub open_circuits: usize,
}

#[derive(Debug, Deserialize)]
pub struct RegisterInstance {
    pub host: String,
    pub port: u16,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            RegistryError::ServiceNotRegistered(_) => (StatusCode::NOT_FOUND, "SERVICE_NOT_FOUND"),
            RegistryError::InstanceNotFound { .. } => (StatusCode::NOT_FOUND, "INSTANCE_NOT_FOUND"),
            RegistryError::InvalidAddress(_) => (StatusCode::BAD_REQUEST, "INVALID_ADDRESS"),
        };
        (
            status,
            Json(json!({
                "error": status.canonical_reason().unwrap_or("Error"),
                "message": self.to_string(),
                "code": code,
            })),
        )
            .into_response()
    }
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let open_circuits = state
        .breakers
        .snapshot()
        .iter()
        .filter(|b| b.state != crate::resilience::CircuitState::Closed)
        .count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if state.shutdown.is_triggered() {
            "shutting_down"
        } else {
            "operational"
        },
        gateway: state.gateway.clone(),
        services: state.registry.services().len(),
        routes: state.routes.load().routes().len(),
        open_circuits,
    })
}

pub async fn get_services(State(state): State<AppState>) -> Json<Vec<ServiceSnapshot>> {
    Json(state.registry.snapshot())
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.breakers.snapshot())
}

pub async fn register_instance(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(body): Json<RegisterInstance>,
) -> Result<(StatusCode, Json<InstanceSnapshot>), RegistryError> {
    let instance = state.registry.register(&service, &body.host, body.port)?;
    state.monitor.ensure_service(&service);
    Ok((StatusCode::CREATED, Json(instance.snapshot())))
}

pub async fn deregister_instance(
    State(state): State<AppState>,
    Path((service, host, port)): Path<(String, String, u16)>,
) -> Result<StatusCode, RegistryError> {
    state.registry.deregister(&service, &host, port)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<StatusCode, RegistryError> {
    state.registry.remove_service(&service)?;
    tracing::info!(service = %service, "Service removed");
    Ok(StatusCode::NO_CONTENT)
}
