//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::SelectionPolicy;
use crate::registry::ServiceInstance;

/// Round-robin selector.
/// The cursor only moves forward; the index wraps modulo the current
/// candidate count, which may change between calls.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for RoundRobin {
    fn next_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        if instances.is_empty() {
            return None;
        }
        let position = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(instances[position % instances.len()].clone())
    }
}
