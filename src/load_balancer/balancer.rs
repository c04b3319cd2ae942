//! Instance selection over the service registry.
//!
//! # Responsibilities
//! - Keep one selection policy (and its cursor) per service
//! - Select from the registry's healthy snapshot
//! - Offer explicit last-resort selection among degraded instances

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::{LoadBalancingPolicy, ServiceConfig};
use crate::error::GatewayError;
use crate::load_balancer::{least_conn::LeastConnections, round_robin::RoundRobin, SelectionPolicy};
use crate::registry::{InstanceGuard, RegistryError, ServiceInstance, ServiceRegistry};

/// A selected instance, holding its in-flight slot until dropped.
#[derive(Debug)]
pub struct Selected {
    guard: InstanceGuard,
    /// True when the instance was picked among unhealthy instances.
    pub last_resort: bool,
}

impl Deref for Selected {
    type Target = ServiceInstance;
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

/// Selects instances for services using per-service policies.
#[derive(Debug)]
pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    kinds: HashMap<String, LoadBalancingPolicy>,
    /// Map of service name -> selection policy (lazily created).
    policies: DashMap<String, Arc<dyn SelectionPolicy>>,
}

impl LoadBalancer {
    pub fn new(registry: Arc<ServiceRegistry>, configs: &[ServiceConfig]) -> Self {
        let kinds = configs
            .iter()
            .map(|c| (c.name.clone(), c.load_balancing))
            .collect();
        Self {
            registry,
            kinds,
            policies: DashMap::new(),
        }
    }

    fn policy(&self, service: &str) -> Arc<dyn SelectionPolicy> {
        if let Some(policy) = self.policies.get(service) {
            return policy.clone();
        }
        self.policies
            .entry(service.to_string())
            .or_insert_with(|| {
                let kind = self.kinds.get(service).copied().unwrap_or_default();
                let policy: Arc<dyn SelectionPolicy> = match kind {
                    LoadBalancingPolicy::RoundRobin => Arc::new(RoundRobin::new()),
                    LoadBalancingPolicy::LeastConnections => Arc::new(LeastConnections::new()),
                };
                policy
            })
            .clone()
    }

    /// Select a healthy instance of `service`.
    pub fn select_instance(&self, service: &str) -> Result<Selected, GatewayError> {
        let healthy = self.registry.healthy_instances(service).map_err(not_registered)?;

        match self.policy(service).next_instance(&healthy) {
            Some(instance) => Ok(Selected {
                guard: instance.acquire(),
                last_resort: false,
            }),
            None => {
                tracing::debug!(service = %service, "No healthy instances found");
                Err(GatewayError::NoHealthyInstance(service.to_string()))
            }
        }
    }

    /// Select among all instances when every instance is unhealthy.
    ///
    /// Callers opt into this explicitly; the result is flagged `last_resort`.
    pub fn select_last_resort(&self, service: &str) -> Result<Selected, GatewayError> {
        let candidates = self.registry.last_resort_instances(service).map_err(not_registered)?;
        let degraded = candidates.iter().all(|i| !i.is_selectable());

        match self.policy(service).next_instance(&candidates) {
            Some(instance) => {
                if degraded {
                    tracing::warn!(service = %service, instance = %instance.address(), "Last-resort dispatch to unhealthy instance");
                }
                Ok(Selected {
                    guard: instance.acquire(),
                    last_resort: degraded,
                })
            }
            None => Err(GatewayError::NoHealthyInstance(service.to_string())),
        }
    }
}

fn not_registered(err: RegistryError) -> GatewayError {
    match err {
        RegistryError::ServiceNotRegistered(service) => GatewayError::ServiceNotRegistered(service),
        other => GatewayError::InvalidRequest(other.to_string()),
    }
}
