//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! target service identified
//!     → registry (healthy instance snapshot)
//!     → per-service SelectionPolicy:
//!         - round_robin.rs (rotate through instances)
//!         - least_conn.rs (pick instance with fewest in-flight requests)
//!     → Selected (instance + in-flight guard)
//! ```
//!
//! # Design Decisions
//! - Policies only see the healthy set; they never decide health
//! - Empty healthy set is reported, never papered over with an unhealthy pick
//! - Last-resort dispatch is a separate, explicit call

pub mod balancer;
pub mod least_conn;
pub mod round_robin;

use std::sync::Arc;

use crate::registry::ServiceInstance;

pub use balancer::{LoadBalancer, Selected};

/// Strategy for picking one instance out of a candidate list.
pub trait SelectionPolicy: Send + Sync + std::fmt::Debug {
    fn next_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>>;
}
