//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every instance of every service
//! - Update instance health with hysteresis thresholds
//! - Evict instances unreachable beyond the grace period
//!
//! One task per service, each owned by the monitor and stopped through the
//! shutdown broadcast.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::health::probe::Prober;
use crate::health::state::HealthState;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::registry::ServiceRegistry;

pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    config: HealthCheckConfig,
    prober: Prober,
    shutdown: Shutdown,
    running: Mutex<HashSet<String>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ServiceRegistry>, config: HealthCheckConfig, shutdown: Shutdown) -> Self {
        Self {
            registry,
            config,
            prober: Prober::new(),
            shutdown,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Spawn a probe task for every registered service.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            "Health monitor starting"
        );
        for entry in self.registry.services() {
            self.ensure_service(entry.name());
        }
    }

    /// Start probing `service` unless a task already runs for it.
    pub fn ensure_service(self: &Arc<Self>, service: &str) {
        if !self.config.enabled {
            return;
        }
        let inserted = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.to_string());
        if !inserted {
            return;
        }

        let monitor = self.clone();
        let service = service.to_string();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            monitor.run_service(service, shutdown).await;
        });
    }

    async fn run_service(self: Arc<Self>, service: String, mut shutdown: broadcast::Receiver<()>) {
        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(service = %service, "Health probe task started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.retire_if_removed(&service) {
                        tracing::info!(service = %service, "Service removed, stopping health probe task");
                        break;
                    }
                    self.check_service(&service).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!(service = %service, "Health monitor received shutdown signal, exiting loop");
                    self.running
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&service);
                    break;
                }
            }
        }
    }

    /// Release the task slot of a service that left the registry. The
    /// registry is read while `running` is held, the same lock
    /// `ensure_service` takes.
    fn retire_if_removed(&self, service: &str) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if self.registry.entry(service).is_ok() {
            return false;
        }
        running.remove(service);
        true
    }

    /// Probe every instance of `service` once and apply the results.
    pub async fn check_service(&self, service: &str) {
        let Ok(entry) = self.registry.entry(service) else {
            return;
        };
        let instances = entry.instances();
        let timeout = Duration::from_millis(self.config.timeout_ms);

        let results = join_all(
            instances
                .iter()
                .map(|instance| self.prober.probe(instance, entry.health_path(), timeout)),
        )
        .await;

        for (instance, result) in instances.iter().zip(results) {
            instance.touch_checked();
            let transition = if result.healthy {
                instance.mark_success(self.config.healthy_threshold as usize)
            } else {
                instance.mark_failure(self.config.unhealthy_threshold as usize)
            };

            if let Some(t) = transition {
                match t.to {
                    HealthState::Unhealthy => tracing::warn!(
                        service = %service,
                        instance = %instance.address(),
                        error = ?result.error,
                        "Instance marked unhealthy"
                    ),
                    _ => tracing::info!(
                        service = %service,
                        instance = %instance.address(),
                        from = ?t.from,
                        "Instance marked healthy"
                    ),
                }
            }
            metrics::record_instance_health(service, &instance.address(), instance.is_selectable());
        }

        if self.config.eviction_grace_secs > 0 {
            self.registry
                .evict_stale(service, Duration::from_secs(self.config.eviction_grace_secs));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn healthy_backend() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                        .await;
                });
            }
        });
        port
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_check_service_applies_thresholds() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.declare_service("nlu", "/health", false);
        let up = registry.register("nlu", "127.0.0.1", healthy_backend().await).unwrap();
        let down = registry.register("nlu", "127.0.0.1", closed_port().await).unwrap();

        let config = HealthCheckConfig {
            unhealthy_threshold: 2,
            healthy_threshold: 1,
            timeout_ms: 500,
            ..Default::default()
        };
        let monitor = HealthMonitor::new(registry.clone(), config, Shutdown::new());

        monitor.check_service("nlu").await;
        assert_eq!(up.health(), HealthState::Healthy);
        assert_eq!(down.health(), HealthState::Unknown);
        assert!(down.last_checked_at().is_some());

        monitor.check_service("nlu").await;
        assert_eq!(down.health(), HealthState::Unhealthy);
        assert_eq!(registry.healthy_instances("nlu").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tasks_stop_on_shutdown() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.declare_service("nlu", "/health", false);
        let shutdown = Shutdown::new();
        let monitor = Arc::new(HealthMonitor::new(
            registry,
            HealthCheckConfig::default(),
            shutdown.clone(),
        ));

        monitor.start();
        monitor.ensure_service("nlu");
        assert_eq!(monitor.running.lock().unwrap().len(), 1);

        shutdown.trigger();
        for _ in 0..50 {
            if monitor.running.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(monitor.running.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retire_checks_registry_under_lock() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.declare_service("mcp", "/health", false);
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            HealthCheckConfig::default(),
            Shutdown::new(),
        ));
        monitor.running.lock().unwrap().insert("mcp".to_string());

        // Still registered: the task keeps its slot.
        assert!(!monitor.retire_if_removed("mcp"));
        assert!(monitor.running.lock().unwrap().contains("mcp"));

        registry.remove_service("mcp").unwrap();
        assert!(monitor.retire_if_removed("mcp"));
        assert!(monitor.running.lock().unwrap().is_empty());

        // A re-added service gets a fresh task.
        registry.declare_service("mcp", "/health", false);
        monitor.ensure_service("mcp");
        assert!(monitor.running.lock().unwrap().contains("mcp"));
    }
}
