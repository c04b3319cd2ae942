//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Aggregate per-service request counters and latencies in fixed windows
//!   for the JSON snapshot
//! - Mirror outcomes into the `metrics` facade, rendered as Prometheus text
//!   by the process-wide `metrics-exporter-prometheus` recorder
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by service, status class
//! - `gateway_request_duration_seconds` (summary): request latency
//! - `gateway_upstream_attempts_total` (counter): attempts by service, result
//! - `gateway_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_circuit_rejections_total` (counter): short-circuited requests
//! - `gateway_instance_healthy` (gauge): 1 when an instance is selectable
//!
//! # Design Decisions
//! - Counters are atomics inside a `DashMap`; no lock on the request path
//! - Window rollover swaps the whole window through `ArcSwap`
//! - Prometheus counters are cumulative; `reset` only clears the JSON window

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{http::StatusCode, routing::get, Router};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::time::Instant;

use crate::config::ObservabilityConfig;
use crate::lifecycle::Shutdown;

/// Outcome class of a proxied request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum StatusClass {
    #[serde(rename = "2xx")]
    Success,
    #[serde(rename = "3xx")]
    Redirect,
    #[serde(rename = "4xx")]
    ClientError,
    #[serde(rename = "5xx")]
    ServerError,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl StatusClass {
    pub const ALL: [StatusClass; 5] = [
        StatusClass::Success,
        StatusClass::Redirect,
        StatusClass::ClientError,
        StatusClass::ServerError,
        StatusClass::Cancelled,
    ];

    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirect,
            400..=499 => StatusClass::ClientError,
            _ => StatusClass::ServerError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Success => "2xx",
            StatusClass::Redirect => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
            StatusClass::Cancelled => "cancelled",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
struct Counter {
    count: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    latency_max_ms: AtomicU64,
}

impl Counter {
    fn record(&self, latency_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.latency_max_ms.fetch_max(latency_ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CounterSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let latency_sum_ms = self.latency_sum_ms.load(Ordering::Relaxed);
        let latency_count = self.latency_count.load(Ordering::Relaxed);
        CounterSnapshot {
            count,
            latency_sum_ms,
            latency_count,
            avg_latency_ms: average(latency_sum_ms, latency_count),
            latency_max_ms: self.latency_max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct ServiceCounters {
    classes: [Counter; 5],
}

#[derive(Debug)]
struct Window {
    started: Instant,
    started_at: DateTime<Utc>,
    services: DashMap<String, ServiceCounters>,
}

impl Window {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            services: DashMap::new(),
        }
    }
}

/// Per-service request aggregate.
#[derive(Debug)]
pub struct MetricsAggregator {
    window: ArcSwap<Window>,
    window_len: Option<Duration>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MetricsAggregator {
    /// `window_len = None` aggregates until an explicit reset.
    pub fn new(window_len: Option<Duration>) -> Self {
        Self {
            window: ArcSwap::from_pointee(Window::new()),
            window_len,
        }
    }

    pub fn from_config(config: &ObservabilityConfig) -> Self {
        let window = (config.metrics_window_secs > 0)
            .then(|| Duration::from_secs(config.metrics_window_secs));
        Self::new(window)
    }

    fn current(&self) -> Arc<Window> {
        let window = self.window.load_full();
        match self.window_len {
            Some(len) if window.started.elapsed() >= len => {
                // Only one caller wins the swap; everyone then reads the fresh window.
                self.window.compare_and_swap(&window, Arc::new(Window::new()));
                self.window.load_full()
            }
            _ => window,
        }
    }

    pub fn record_outcome(&self, service: &str, class: StatusClass, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;
        let window = self.current();
        match window.services.get(service) {
            Some(counters) => counters.classes[class.index()].record(latency_ms),
            None => window
                .services
                .entry(service.to_string())
                .or_default()
                .classes[class.index()]
                .record(latency_ms),
        }

        metrics::counter!(
            "gateway_requests_total",
            "service" => service.to_string(),
            "status_class" => class.as_str()
        )
        .increment(1);
        metrics::histogram!("gateway_request_duration_seconds", "service" => service.to_string())
            .record(latency.as_secs_f64());
    }

    /// Discard all counters and start a new window.
    pub fn reset(&self) {
        self.window.store(Arc::new(Window::new()));
        tracing::info!("Metrics reset");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let window = self.current();
        let mut services: Vec<ServiceMetrics> = window
            .services
            .iter()
            .map(|entry| ServiceMetrics::from_counters(entry.key(), entry.value()))
            .collect();
        services.sort_by(|a, b| a.service.cmp(&b.service));

        let total_requests = services.iter().map(|s| s.total_requests).sum();
        let total_errors = services.iter().map(|s| s.errors).sum();
        MetricsSnapshot {
            window_started_at: window.started_at,
            window_secs: self.window_len.map(|d| d.as_secs()),
            total_requests,
            total_errors,
            services,
        }
    }
}

fn average(sum: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub count: u64,
    pub latency_sum_ms: u64,
    pub latency_count: u64,
    pub avg_latency_ms: f64,
    pub latency_max_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    pub service: String,
    pub total_requests: u64,
    /// 5xx responses plus gateway errors.
    pub errors: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub by_status: BTreeMap<&'static str, CounterSnapshot>,
}

impl ServiceMetrics {
    fn from_counters(service: &str, counters: &ServiceCounters) -> Self {
        let by_status: BTreeMap<_, _> = StatusClass::ALL
            .iter()
            .map(|class| (class.as_str(), counters.classes[class.index()].snapshot()))
            .filter(|(_, c)| c.count > 0)
            .collect();

        let total_requests = by_status.values().map(|c| c.count).sum();
        let errors = by_status.get(StatusClass::ServerError.as_str()).map_or(0, |c| c.count);
        let latency_sum: u64 = by_status.values().map(|c| c.latency_sum_ms).sum();
        let latency_count: u64 = by_status.values().map(|c| c.latency_count).sum();

        Self {
            service: service.to_string(),
            total_requests,
            errors,
            error_rate: average(errors, total_requests),
            avg_latency_ms: average(latency_sum, latency_count),
            max_latency_ms: by_status.values().map(|c| c.latency_max_ms).max().unwrap_or(0),
            by_status,
        }
    }

    pub fn count(&self, class: StatusClass) -> u64 {
        self.by_status.get(class.as_str()).map_or(0, |c| c.count)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub window_started_at: DateTime<Utc>,
    pub window_secs: Option<u64>,
    pub total_requests: u64,
    pub total_errors: u64,
    pub services: Vec<ServiceMetrics>,
}

impl MetricsSnapshot {
    pub fn service(&self, name: &str) -> Option<&ServiceMetrics> {
        self.services.iter().find(|s| s.service == name)
    }
}

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Handle to the process-wide Prometheus recorder, installed on first use.
///
/// If another recorder already owns the `metrics` facade the returned handle
/// is detached and renders nothing.
pub fn prometheus_handle() -> PrometheusHandle {
    PROMETHEUS
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                describe_metrics();
                handle
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install Prometheus recorder");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

fn describe_metrics() {
    describe_counter!("gateway_requests_total", "Proxied requests by service and status class");
    describe_histogram!("gateway_request_duration_seconds", "Proxied request latency in seconds");
    describe_counter!("gateway_upstream_attempts_total", "Upstream attempts by service and result");
    describe_counter!("gateway_circuit_transitions_total", "Circuit breaker state transitions");
    describe_gauge!("gateway_circuit_state", "Circuit state (0=closed, 1=half-open, 2=open)");
    describe_counter!("gateway_circuit_rejections_total", "Requests short-circuited by an open breaker");
    describe_gauge!("gateway_instance_healthy", "1 when an instance is selectable, else 0");
}

/// Drain histogram buckets until shutdown. The recorder does not do this
/// on its own when installed without the builder's HTTP listener.
pub async fn run_upkeep(handle: PrometheusHandle, shutdown: Shutdown) {
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    let mut stop = shutdown.subscribe();
    loop {
        tokio::select! {
            _ = ticker.tick() => handle.run_upkeep(),
            _ = stop.recv() => break,
        }
    }
}

/// Serve the Prometheus text on a listener of its own.
pub async fn serve_exporter(addr: SocketAddr, handle: PrometheusHandle) -> std::io::Result<()> {
    let app = Router::new().route("/metrics", get(move || async move { handle.render() }));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    axum::serve(listener, app).await
}

/// Health gauge for one instance.
pub fn record_instance_health(service: &str, instance: &str, healthy: bool) {
    metrics::gauge!(
        "gateway_instance_healthy",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

/// Count one upstream attempt.
pub fn record_attempt(service: &str, result: &'static str) {
    metrics::counter!(
        "gateway_upstream_attempts_total",
        "service" => service.to_string(),
        "result" => result
    )
    .increment(1);
}
