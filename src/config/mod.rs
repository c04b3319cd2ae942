//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, env overrides)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → route table swapped atomically
//! ```

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, CircuitBreakerConfig, GatewayConfig, HealthCheckConfig, ListenerConfig,
    LoadBalancingPolicy, ObservabilityConfig, PathRewrite, RetryBackoff, RouteConfig,
    ServiceConfig, TimeoutConfig,
};
