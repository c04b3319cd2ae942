//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Observe dispatch outcomes
//! - Track consecutive failures per instance
//! - Trigger state transition on threshold breach
//!
//! # Design Decisions
//! - Only connection errors, timeouts and 5xx count as failures
//! - 4xx are NOT failures (client error, not backend)
//! - A failure below the threshold leaves the instance suspect but selectable

use crate::config::HealthCheckConfig;
use crate::health::state::HealthState;
use crate::observability::metrics;
use crate::registry::ServiceInstance;

#[derive(Debug, Clone, Copy)]
pub struct PassiveHealth {
    failure_threshold: usize,
    recovery_threshold: usize,
}

impl PassiveHealth {
    pub fn new(config: &HealthCheckConfig) -> Self {
        Self {
            failure_threshold: config.passive_failure_threshold.max(1) as usize,
            recovery_threshold: config.healthy_threshold.max(1) as usize,
        }
    }

    pub fn observe_success(&self, instance: &ServiceInstance) {
        if let Some(t) = instance.mark_success(self.recovery_threshold) {
            tracing::info!(service = %instance.service(), instance = %instance.address(), from = ?t.from, "Instance recovered on live traffic");
            metrics::record_instance_health(instance.service(), &instance.address(), true);
        }
    }

    pub fn observe_failure(&self, instance: &ServiceInstance) {
        match instance.mark_failure(self.failure_threshold) {
            Some(t) if t.to == HealthState::Unhealthy => {
                tracing::warn!(service = %instance.service(), instance = %instance.address(), "Instance marked unhealthy after failed dispatches");
                metrics::record_instance_health(instance.service(), &instance.address(), false);
            }
            _ => {
                tracing::debug!(service = %instance.service(), instance = %instance.address(), failures = instance.consecutive_failures(), "Instance suspect");
            }
        }
    }
}
