//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Per-service periodic task
//!     → probe.rs (GET health path, bounded by timeout)
//!     → Update instance state
//!
//! Passive health checks (passive.rs):
//!     Dispatch failure observed
//!     → Increment failure count (instance suspect)
//!     → Flip to Unhealthy if threshold reached
//!
//! On-demand views (aggregate.rs):
//!     /health/services, /health/ready
//!     → probe.rs for every instance, concurrently
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - State transitions require consecutive successes/failures
//! - Health state is per instance, not per service

pub mod active;
pub mod aggregate;
pub mod passive;
pub mod probe;
pub mod state;

pub use active::HealthMonitor;
pub use aggregate::{AggregateHealth, HealthAggregator, Readiness, ServiceHealth, ServiceStatus};
pub use passive::PassiveHealth;
pub use state::HealthState;
