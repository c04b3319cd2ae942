//! Service registry.
//!
//! # Data Flow
//! ```text
//! config services / admin API
//!     → register(instance)
//!     → ServiceEntry (copy-on-write instance list)
//!
//! load balancer
//!     → healthy_instances(service)   (lock-free snapshot read)
//!
//! active prober / passive observer
//!     → instance health counters (atomics, no registry write)
//! ```
//!
//! Instance lists are swapped atomically on register/deregister so readers
//! never block on writers. An unknown service is an error, an empty healthy
//! list is not.

pub mod instance;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::config::ServiceConfig;
use crate::config::validation::parse_instance_address;
use crate::health::state::{HealthState, Transition};

pub use instance::{InstanceGuard, InstanceSnapshot, ServiceInstance};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("service `{0}` is not registered")]
    ServiceNotRegistered(String),

    #[error("instance `{address}` is not registered for service `{service}`")]
    InstanceNotFound { service: String, address: String },

    #[error("invalid instance address `{0}`")]
    InvalidAddress(String),
}

/// One logical backend service and its instances.
#[derive(Debug)]
pub struct ServiceEntry {
    name: String,
    health_path: String,
    critical: bool,
    instances: ArcSwap<Vec<Arc<ServiceInstance>>>,
}

impl ServiceEntry {
    fn new(name: &str, health_path: &str, critical: bool) -> Self {
        Self {
            name: name.to_string(),
            health_path: health_path.to_string(),
            critical,
            instances: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn health_path(&self) -> &str {
        &self.health_path
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    /// Current instance list, in registration order.
    pub fn instances(&self) -> Arc<Vec<Arc<ServiceInstance>>> {
        self.instances.load_full()
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let instances = self.instances();
        ServiceSnapshot {
            service: self.name.clone(),
            critical: self.critical,
            health_path: self.health_path.clone(),
            healthy: instances.iter().filter(|i| i.is_selectable()).count(),
            instances: instances.iter().map(|i| i.snapshot()).collect(),
        }
    }
}

/// Serializable view of a service entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshot {
    pub service: String,
    pub critical: bool,
    pub health_path: String,
    pub healthy: usize,
    pub instances: Vec<InstanceSnapshot>,
}

/// Registry of backend services and their live instances.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured services.
    pub fn from_config(configs: &[ServiceConfig]) -> Self {
        let registry = Self::new();
        for config in configs {
            registry.declare_service(&config.name, &config.health_path, config.critical);
            for address in &config.instances {
                match parse_instance_address(address) {
                    Some((host, port)) => {
                        if let Err(e) = registry.register(&config.name, &host, port) {
                            tracing::warn!(service = %config.name, error = %e, "Skipping instance");
                        }
                    }
                    None => tracing::warn!("Invalid instance address: {}", address),
                }
            }
        }
        registry
    }

    /// Declare a service with no instances yet. Existing entries are kept.
    pub fn declare_service(&self, name: &str, health_path: &str, critical: bool) -> Arc<ServiceEntry> {
        self.services
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ServiceEntry::new(name, health_path, critical)))
            .clone()
    }

    /// Register an instance, creating the service entry on first sight.
    ///
    /// Re-registering a known `host:port` refreshes it and returns the
    /// existing instance so its health history is kept.
    pub fn register(&self, service: &str, host: &str, port: u16) -> Result<Arc<ServiceInstance>, RegistryError> {
        let entry = self.declare_service(service, "/health", false);
        let candidate = Arc::new(ServiceInstance::new(service, host, port)?);

        let mut registered = candidate.clone();
        entry.instances.rcu(|current| {
            if let Some(existing) = current.iter().find(|i| i.matches(host, port)) {
                registered = existing.clone();
                return current.clone();
            }
            registered = candidate.clone();
            let mut next = current.as_ref().clone();
            next.push(candidate.clone());
            Arc::new(next)
        });

        registered.touch_checked();
        tracing::info!(service = %service, instance = %registered.address(), "Instance registered");
        Ok(registered)
    }

    /// Remove one instance. The service entry itself stays.
    pub fn deregister(&self, service: &str, host: &str, port: u16) -> Result<(), RegistryError> {
        let entry = self.entry(service)?;
        let mut removed = false;
        entry.instances.rcu(|current| {
            removed = current.iter().any(|i| i.matches(host, port));
            Arc::new(
                current
                    .iter()
                    .filter(|i| !i.matches(host, port))
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        });

        if removed {
            tracing::info!(service = %service, instance = %format!("{}:{}", host, port), "Instance deregistered");
            Ok(())
        } else {
            Err(RegistryError::InstanceNotFound {
                service: service.to_string(),
                address: format!("{}:{}", host, port),
            })
        }
    }

    /// Decommission a whole service.
    pub fn remove_service(&self, service: &str) -> Result<(), RegistryError> {
        self.services
            .remove(service)
            .map(|_| ())
            .ok_or_else(|| RegistryError::ServiceNotRegistered(service.to_string()))
    }

    /// Explicitly set an instance's health.
    pub fn mark_health(
        &self,
        service: &str,
        host: &str,
        port: u16,
        health: HealthState,
    ) -> Result<Option<Transition>, RegistryError> {
        let instance = self.find(service, host, port)?;
        instance.touch_checked();
        Ok(instance.set_health(health))
    }

    pub fn find(&self, service: &str, host: &str, port: u16) -> Result<Arc<ServiceInstance>, RegistryError> {
        self.entry(service)?
            .instances()
            .iter()
            .find(|i| i.matches(host, port))
            .cloned()
            .ok_or_else(|| RegistryError::InstanceNotFound {
                service: service.to_string(),
                address: format!("{}:{}", host, port),
            })
    }

    pub fn entry(&self, service: &str) -> Result<Arc<ServiceEntry>, RegistryError> {
        self.services
            .get(service)
            .map(|e| e.value().clone())
            .ok_or_else(|| RegistryError::ServiceNotRegistered(service.to_string()))
    }

    /// Selectable instances (Healthy or Unknown) in registration order.
    pub fn healthy_instances(&self, service: &str) -> Result<Vec<Arc<ServiceInstance>>, RegistryError> {
        Ok(self
            .entry(service)?
            .instances()
            .iter()
            .filter(|i| i.is_selectable())
            .cloned()
            .collect())
    }

    /// Instances for last-resort dispatch.
    ///
    /// Unhealthy instances are only returned when every instance of the
    /// service is unhealthy; otherwise this is the healthy set.
    pub fn last_resort_instances(&self, service: &str) -> Result<Vec<Arc<ServiceInstance>>, RegistryError> {
        let instances = self.entry(service)?.instances();
        let healthy: Vec<_> = instances.iter().filter(|i| i.is_selectable()).cloned().collect();
        if healthy.is_empty() {
            Ok(instances.as_ref().clone())
        } else {
            Ok(healthy)
        }
    }

    /// All service entries, sorted by name.
    pub fn services(&self) -> Vec<Arc<ServiceEntry>> {
        let mut entries: Vec<_> = self.services.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        self.services().iter().map(|e| e.snapshot()).collect()
    }

    /// Drop instances of `service` that have been unhealthy for longer than `grace`.
    /// Returns the evicted addresses.
    pub fn evict_stale(&self, service: &str, grace: Duration) -> Vec<String> {
        let Ok(entry) = self.entry(service) else {
            return Vec::new();
        };
        let stale = |i: &Arc<ServiceInstance>| {
            i.health() == HealthState::Unhealthy && i.unhealthy_for().is_some_and(|d| d >= grace)
        };

        let mut evicted = Vec::new();
        entry.instances.rcu(|current| {
            evicted = current.iter().filter(|i| stale(*i)).map(|i| i.address()).collect();
            Arc::new(current.iter().filter(|i| !stale(*i)).cloned().collect::<Vec<_>>())
        });

        for address in &evicted {
            tracing::warn!(service = %service, instance = %address, "Evicted instance unreachable beyond grace period");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_service_is_distinct_from_empty() {
        let registry = ServiceRegistry::new();
        assert_eq!(
            registry.healthy_instances("banking").unwrap_err(),
            RegistryError::ServiceNotRegistered("banking".into())
        );

        registry.declare_service("banking", "/health", true);
        assert!(registry.healthy_instances("banking").unwrap().is_empty());
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = ServiceRegistry::new();
        let a = registry.register("banking", "h1", 3005).unwrap();
        a.set_health(HealthState::Healthy);
        let b = registry.register("banking", "h1", 3005).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.entry("banking").unwrap().instances().len(), 1);
        assert_eq!(b.health(), HealthState::Healthy);
    }

    #[test]
    fn test_deregister() {
        let registry = ServiceRegistry::new();
        registry.register("nlu", "h1", 3003).unwrap();
        registry.register("nlu", "h2", 3003).unwrap();
        registry.deregister("nlu", "h1", 3003).unwrap();

        let remaining = registry.healthy_instances("nlu").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].host(), "h2");

        assert!(matches!(
            registry.deregister("nlu", "h1", 3003),
            Err(RegistryError::InstanceNotFound { .. })
        ));
    }

    #[test]
    fn test_unhealthy_excluded_unless_all_unhealthy() {
        let registry = ServiceRegistry::new();
        registry.register("banking", "h1", 3005).unwrap();
        registry.register("banking", "h2", 3005).unwrap();
        registry.mark_health("banking", "h1", 3005, HealthState::Unhealthy).unwrap();

        let healthy = registry.healthy_instances("banking").unwrap();
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].host(), "h2");
        assert_eq!(registry.last_resort_instances("banking").unwrap().len(), 1);

        registry.mark_health("banking", "h2", 3005, HealthState::Unhealthy).unwrap();
        assert!(registry.healthy_instances("banking").unwrap().is_empty());
        assert_eq!(registry.last_resort_instances("banking").unwrap().len(), 2);
    }

    #[test]
    fn test_snapshot_reader_unaffected_by_writes() {
        let registry = ServiceRegistry::new();
        registry.register("mcp", "h1", 4000).unwrap();
        let before = registry.entry("mcp").unwrap().instances();
        registry.register("mcp", "h2", 4000).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(registry.entry("mcp").unwrap().instances().len(), 2);
    }

    #[test]
    fn test_from_config() {
        let registry = ServiceRegistry::from_config(&[ServiceConfig {
            name: "banking".into(),
            instances: vec!["h1:3005".into(), "h2:3005".into()],
            critical: true,
            ..Default::default()
        }]);
        let entry = registry.entry("banking").unwrap();
        assert!(entry.is_critical());
        assert_eq!(entry.instances().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_stale() {
        let registry = ServiceRegistry::new();
        registry.register("nlp", "h1", 3002).unwrap();
        registry.register("nlp", "h2", 3002).unwrap();
        registry.mark_health("nlp", "h1", 3002, HealthState::Unhealthy).unwrap();

        assert!(registry.evict_stale("nlp", Duration::from_secs(30)).is_empty());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(registry.evict_stale("nlp", Duration::from_secs(30)), vec!["h1:3002".to_string()]);
        assert_eq!(registry.entry("nlp").unwrap().instances().len(), 1);
    }
}
