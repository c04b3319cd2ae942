//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (windowed request counters, breaker gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → /metrics (JSON snapshot), /metrics/prometheus (text exposition)
//!     → optional standalone Prometheus exporter
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all subsystems
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
