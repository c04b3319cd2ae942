//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NetworkErrorCode;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway identity, injected as `X-Gateway-Service`.
    pub gateway: GatewayIdentity,

    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Backend services and their static instances.
    pub services: Vec<ServiceConfig>,

    /// Route definitions mapping path prefixes to services.
    pub routes: Vec<RouteConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Default circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin endpoints configuration.
    pub admin: AdminConfig,

    /// Caller identity propagation.
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayIdentity {
    pub name: String,
}

impl Default for GatewayIdentity {
    fn default() -> Self {
        Self {
            name: "api-gateway".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3001").
    pub bind_address: String,

    /// Largest request body buffered for forwarding, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3001".to_string(),
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Selection policy applied to a service's healthy instances.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingPolicy {
    #[default]
    RoundRobin,
    LeastConnections,
}

/// A logical backend service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name (e.g., "banking", "nlu").
    pub name: String,

    /// Static instances as "host:port".
    pub instances: Vec<String>,

    /// Path probed for health checks.
    pub health_path: String,

    /// Whether readiness depends on this service.
    pub critical: bool,

    /// Instance selection policy.
    pub load_balancing: LoadBalancingPolicy,

    /// Per-service circuit breaker override.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            instances: Vec::new(),
            health_path: "/health".to_string(),
            critical: false,
            load_balancing: LoadBalancingPolicy::RoundRobin,
            circuit_breaker: None,
        }
    }
}

/// Delay strategy between retry attempts.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    #[default]
    Fixed,
    Exponential,
}

/// A single path prefix rewrite, e.g. `/api/banking` -> `/api`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PathRewrite {
    pub prefix: String,
    #[serde(default)]
    pub replacement: String,
}

/// Route configuration mapping request paths to a backend service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Route identifier for logging.
    pub name: String,

    /// Target service name.
    pub service: String,

    /// Prefixes this route answers for, with their rewrites.
    pub path_rewrite: Vec<PathRewrite>,

    /// Per-attempt upstream timeout in milliseconds.
    pub timeout_ms: u64,

    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay between attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// Fixed delay or exponential backoff with jitter.
    pub retry_backoff: RetryBackoff,

    /// Cap for exponential backoff in milliseconds.
    pub max_retry_delay_ms: u64,

    /// Network failures that may be retried.
    pub retryable_error_codes: Vec<NetworkErrorCode>,

    /// Upstream statuses that may be retried.
    pub retryable_status_codes: Vec<u16>,

    /// Methods retried without further marking.
    pub retry_methods: Vec<String>,

    /// Marks every method on this route as safe to retry.
    pub idempotent: bool,

    /// Dispatch to an unhealthy instance when all instances are unhealthy.
    pub allow_last_resort: bool,

    /// Static target used when no healthy instance can be produced.
    pub fallback_url: Option<String>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            service: String::new(),
            path_rewrite: Vec::new(),
            timeout_ms: 30_000,
            max_retries: 2,
            retry_delay_ms: 100,
            retry_backoff: RetryBackoff::Fixed,
            max_retry_delay_ms: 2_000,
            retryable_error_codes: vec![
                NetworkErrorCode::ConnectionRefused,
                NetworkErrorCode::ConnectionReset,
                NetworkErrorCode::TimedOut,
                NetworkErrorCode::DnsFailure,
            ],
            retryable_status_codes: vec![500, 502, 503, 504],
            retry_methods: vec!["GET".to_string(), "HEAD".to_string()],
            idempotent: false,
            allow_last_resort: false,
            fallback_url: None,
        }
    }
}

impl RouteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in milliseconds.
    pub timeout_ms: u64,

    /// Number of consecutive probe failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,

    /// Consecutive failed dispatches before an instance is marked unhealthy.
    pub passive_failure_threshold: u32,

    /// Unhealthy instances older than this are evicted (0 disables).
    pub eviction_grace_secs: u64,

    /// Probe timeout used by `/health/ready` and `/health/services`.
    pub readiness_timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_ms: 2_000,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            passive_failure_threshold: 3,
            eviction_grace_secs: 0,
            readiness_timeout_ms: 2_000,
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit.
    pub failure_threshold: u32,

    /// Length of the failure counting window in milliseconds.
    pub window_ms: u64,

    /// Time the circuit stays open before probing, in milliseconds.
    pub cooldown_ms: u64,

    /// Consecutive probe successes needed to close again.
    pub half_open_probe_limit: u32,

    /// Count upstream 4xx responses as breaker failures.
    pub client_errors_trip: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_ms: 60_000,
            cooldown_ms: 30_000,
            half_open_probe_limit: 1,
            client_errors_trip: true,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Deadline for a whole proxied request, retries included, in milliseconds.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            request_ms: 60_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Aggregation window for request counters in seconds (0 = until reset).
    pub metrics_window_secs: u64,

    /// Enable the standalone Prometheus exporter.
    pub exporter_enabled: bool,

    /// Exporter bind address.
    pub exporter_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_window_secs: 0,
            exporter_enabled: false,
            exporter_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoints configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Require the bearer key on admin endpoints.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Caller identity propagation.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct IdentityConfig {
    /// Accept `X-User-ID` / `X-User-Role` from the upstream auth layer.
    /// When false, inbound identity headers are dropped.
    pub trust_headers: bool,
}
