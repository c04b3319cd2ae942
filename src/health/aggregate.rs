//! Aggregated health views.
//!
//! `/health/services` and `/health/ready` probe backends on demand with a
//! short timeout. All services (and all instances of each) are probed
//! concurrently, so one slow backend costs at most one timeout. These views
//! report; they never change registry health state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;

use crate::health::probe::{ProbeResult, Prober};
use crate::registry::{ServiceEntry, ServiceRegistry};
use crate::resilience::{CircuitBreakers, CircuitState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Every instance answered.
    Healthy,
    /// Some instances answered.
    Degraded,
    /// No instance answered.
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceHealth {
    pub url: String,
    #[serde(flatten)]
    pub probe: ProbeResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub service: String,
    pub status: ServiceStatus,
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub critical: bool,
    pub breaker: CircuitState,
    pub instances: Vec<InstanceHealth>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateHealth {
    pub status: ServiceStatus,
    pub timestamp: DateTime<Utc>,
    pub services: Vec<ServiceHealth>,
}

impl AggregateHealth {
    /// A degraded service still answers on some instances and does not
    /// count here.
    pub fn any_unhealthy(&self) -> bool {
        self.services.iter().any(|s| s.status == ServiceStatus::Unhealthy)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub ready: bool,
    pub timestamp: DateTime<Utc>,
    /// Critical services only.
    pub services: Vec<ServiceHealth>,
}

pub struct HealthAggregator {
    registry: Arc<ServiceRegistry>,
    breakers: Arc<CircuitBreakers>,
    prober: Prober,
    timeout: Duration,
}

impl HealthAggregator {
    pub fn new(registry: Arc<ServiceRegistry>, breakers: Arc<CircuitBreakers>, timeout: Duration) -> Self {
        Self {
            registry,
            breakers,
            prober: Prober::new(),
            timeout,
        }
    }

    pub async fn check_services(&self) -> AggregateHealth {
        let entries = self.registry.services();
        let services = join_all(entries.iter().map(|e| self.check(e))).await;

        let status = if services.iter().all(|s| s.status == ServiceStatus::Healthy) {
            ServiceStatus::Healthy
        } else if services.iter().any(|s| s.status != ServiceStatus::Unhealthy) {
            ServiceStatus::Degraded
        } else {
            ServiceStatus::Unhealthy
        };

        AggregateHealth {
            status,
            timestamp: Utc::now(),
            services,
        }
    }

    /// Ready iff every critical service has at least one answering instance.
    pub async fn readiness(&self) -> Readiness {
        let critical: Vec<_> = self
            .registry
            .services()
            .into_iter()
            .filter(|e| e.is_critical())
            .collect();
        let services = join_all(critical.iter().map(|e| self.check(e))).await;
        let ready = services.iter().all(|s| s.status != ServiceStatus::Unhealthy);

        if !ready {
            let down: Vec<_> = services
                .iter()
                .filter(|s| s.status == ServiceStatus::Unhealthy)
                .map(|s| s.service.as_str())
                .collect();
            tracing::warn!(services = ?down, "Readiness check failed");
        }

        Readiness {
            ready,
            timestamp: Utc::now(),
            services,
        }
    }

    async fn check(&self, entry: &ServiceEntry) -> ServiceHealth {
        let instances = entry.instances();
        let probes = join_all(
            instances
                .iter()
                .map(|i| self.prober.probe(i, entry.health_path(), self.timeout)),
        )
        .await;

        let instances: Vec<InstanceHealth> = instances
            .iter()
            .zip(probes)
            .map(|(instance, probe)| InstanceHealth {
                url: Prober::url(instance, entry.health_path()),
                probe,
            })
            .collect();

        let healthy = instances.iter().filter(|i| i.probe.healthy).count();
        let status = if instances.is_empty() || healthy == 0 {
            ServiceStatus::Unhealthy
        } else if healthy == instances.len() {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Degraded
        };

        let url = instances
            .iter()
            .find(|i| i.probe.healthy)
            .or_else(|| instances.first())
            .map(|i| i.url.clone());
        let error = if instances.is_empty() {
            Some("no instances registered".to_string())
        } else if status == ServiceStatus::Unhealthy {
            instances.iter().find_map(|i| i.probe.error.clone())
        } else {
            None
        };

        ServiceHealth {
            service: entry.name().to_string(),
            status,
            url,
            error,
            critical: entry.is_critical(),
            breaker: self.breakers.get(entry.name()).state(),
            instances,
        }
    }
}
