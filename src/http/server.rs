//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared subsystems from config and inject them as `AppState`
//! - Create the Axum router: gateway endpoints, admin API, proxy fallback
//! - Wire up middleware (request ID, tracing, identity, gateway headers)
//! - Run health probing and route hot reload alongside the server
//! - Serve with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use metrics_exporter_prometheus::PrometheusHandle;
use axum::{
    http::{HeaderName, HeaderValue},
    middleware,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin;
use crate::config::GatewayConfig;
use crate::health::{HealthAggregator, HealthMonitor, PassiveHealth};
use crate::http::{proxy::proxy_handler, request::caller_identity, response::gateway_headers, status};
use crate::lifecycle::Shutdown;
use crate::load_balancer::LoadBalancer;
use crate::observability::metrics::{prometheus_handle, run_upkeep, MetricsAggregator};
use crate::proxy::{Dispatcher, UpstreamClient};
use crate::registry::ServiceRegistry;
use crate::resilience::CircuitBreakers;
use crate::routing::RouteTable;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: String,
    pub gateway_header: HeaderValue,
    pub routes: Arc<ArcSwap<RouteTable>>,
    pub registry: Arc<ServiceRegistry>,
    pub breakers: Arc<CircuitBreakers>,
    pub metrics: Arc<MetricsAggregator>,
    pub prometheus: PrometheusHandle,
    pub dispatcher: Arc<Dispatcher>,
    pub health: Arc<HealthAggregator>,
    pub monitor: Arc<HealthMonitor>,
    pub admin_enabled: bool,
    pub admin_key: Arc<str>,
    pub trust_identity_headers: bool,
    pub max_body_bytes: usize,
    pub shutdown: Shutdown,
}

impl AppState {
    pub fn from_config(config: &GatewayConfig, shutdown: Shutdown) -> Self {
        let registry = Arc::new(ServiceRegistry::from_config(&config.services));
        let breakers = Arc::new(CircuitBreakers::new(&config.circuit_breaker, &config.services));
        let metrics = Arc::new(MetricsAggregator::from_config(&config.observability));
        let balancer = Arc::new(LoadBalancer::new(registry.clone(), &config.services));

        let dispatcher = Dispatcher::new(
            balancer,
            breakers.clone(),
            metrics.clone(),
            PassiveHealth::new(&config.health_check),
            UpstreamClient::new(Duration::from_millis(config.timeouts.connect_ms)),
            config.gateway.name.clone(),
            Duration::from_millis(config.timeouts.request_ms),
        );
        let health = HealthAggregator::new(
            registry.clone(),
            breakers.clone(),
            Duration::from_millis(config.health_check.readiness_timeout_ms),
        );
        let monitor = HealthMonitor::new(registry.clone(), config.health_check.clone(), shutdown.clone());

        let gateway_header = HeaderValue::from_str(&config.gateway.name)
            .unwrap_or_else(|_| HeaderValue::from_static("api-gateway"));

        Self {
            gateway: config.gateway.name.clone(),
            gateway_header,
            routes: Arc::new(ArcSwap::from_pointee(RouteTable::from_config(&config.routes))),
            registry,
            breakers,
            metrics,
            prometheus: prometheus_handle(),
            dispatcher: Arc::new(dispatcher),
            health: Arc::new(health),
            monitor: Arc::new(monitor),
            admin_enabled: config.admin.enabled,
            admin_key: Arc::from(config.admin.api_key.as_str()),
            trust_identity_headers: config.identity.trust_headers,
            max_body_bytes: config.listener.max_body_bytes,
            shutdown,
        }
    }

    /// Apply a reloaded config: swap the route table and pick up new
    /// services and instances. Breaker and balancing settings keep their
    /// startup values.
    pub fn apply_config(&self, config: &GatewayConfig) {
        self.routes
            .store(Arc::new(RouteTable::from_config(&config.routes)));

        for service in &config.services {
            self.registry
                .declare_service(&service.name, &service.health_path, service.critical);
            for address in &service.instances {
                if let Some((host, port)) = crate::config::validation::parse_instance_address(address) {
                    if let Err(e) = self.registry.register(&service.name, &host, port) {
                        tracing::warn!(service = %service.name, error = %e, "Skipping instance on reload");
                    }
                }
            }
            self.monitor.ensure_service(&service.name);
        }

        tracing::info!(
            routes = config.routes.len(),
            services = config.services.len(),
            "Configuration reloaded"
        );
    }
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
    state: AppState,
}

impl GatewayServer {
    /// Create a new gateway server with the given configuration.
    pub fn new(config: &GatewayConfig, shutdown: Shutdown) -> Self {
        let state = AppState::from_config(config, shutdown);
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(state: AppState) -> Router {
        let x_request_id = HeaderName::from_static("x-request-id");

        Router::new()
            .route("/health", get(status::health))
            .route("/health/live", get(status::live))
            .route("/health/ready", get(status::ready))
            .route("/health/services", get(status::services))
            .route("/metrics", get(status::metrics))
            .route("/metrics/prometheus", get(status::metrics_prometheus))
            .merge(admin::router(state.clone()))
            .fallback(proxy_handler)
            .layer(middleware::from_fn_with_state(state.clone(), caller_identity))
            .layer(middleware::from_fn_with_state(state.clone(), gateway_headers))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(x_request_id)),
            )
            .with_state(state)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until shutdown is triggered.
    ///
    /// `config_updates` carries reloaded configs from the file watcher.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: Option<mpsc::UnboundedReceiver<GatewayConfig>>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, gateway = %self.state.gateway, "HTTP server starting");

        self.state.monitor.start();
        tokio::spawn(run_upkeep(
            self.state.prometheus.clone(),
            self.state.shutdown.clone(),
        ));

        if let Some(mut updates) = config_updates {
            let state = self.state.clone();
            let mut shutdown = self.state.shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        update = updates.recv() => match update {
                            Some(config) => state.apply_config(&config),
                            None => break,
                        },
                        _ = shutdown.recv() => break,
                    }
                }
            });
        }

        let mut shutdown = self.state.shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        // Serve with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Draining in-flight requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
