//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::SelectionPolicy;
use crate::registry::ServiceInstance;

/// Least connections selector.
/// Selects the instance with the fewest in-flight requests.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionPolicy for LeastConnections {
    fn next_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        // Ties go to the first instance (stability).
        instances.iter().min_by_key(|i| i.active_requests()).cloned()
    }
}
