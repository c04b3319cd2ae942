//! Single health probe.
//!
//! Shared by the periodic monitor and the on-demand `/health/services`
//! aggregate so both judge an instance the same way: a 2xx answer on the
//! service health path within the timeout.

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::Serialize;
use tokio::time::{self, Instant};

use crate::registry::ServiceInstance;

/// Outcome of one probe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub healthy: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Prober {
    client: Client<HttpConnector, Body>,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }

    pub fn url(instance: &ServiceInstance, path: &str) -> String {
        format!("http://{}{}", instance.authority(), path)
    }

    pub async fn probe(&self, instance: &ServiceInstance, path: &str, timeout: Duration) -> ProbeResult {
        let started = Instant::now();
        let request = match Request::builder()
            .method("GET")
            .uri(Self::url(instance, path))
            .header("user-agent", "edge-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(service = %instance.service(), "Failed to build health check request: {}", e);
                return ProbeResult {
                    healthy: false,
                    status: None,
                    latency_ms: 0,
                    error: Some("invalid health check request".to_string()),
                };
            }
        };

        let outcome = time::timeout(timeout, self.client.request(request)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(response)) => {
                let status = response.status();
                let healthy = status.is_success();
                if !healthy {
                    tracing::debug!(service = %instance.service(), instance = %instance.address(), status = %status, "Health check failed: non-success status");
                }
                ProbeResult {
                    healthy,
                    status: Some(status.as_u16()),
                    latency_ms,
                    error: (!healthy).then(|| format!("status {}", status.as_u16())),
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(service = %instance.service(), instance = %instance.address(), error = %e, "Health check failed: connection error");
                ProbeResult {
                    healthy: false,
                    status: None,
                    latency_ms,
                    error: Some("connection failed".to_string()),
                }
            }
            Err(_) => {
                tracing::debug!(service = %instance.service(), instance = %instance.address(), "Health check failed: timeout");
                ProbeResult {
                    healthy: false,
                    status: None,
                    latency_ms,
                    error: Some("timeout".to_string()),
                }
            }
        }
    }
}
