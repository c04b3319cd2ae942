//! Instance health states.
//!
//! # States
//! - Unknown: not yet probed, still eligible for traffic
//! - Healthy: instance receives traffic
//! - Unhealthy: instance excluded from load balancing
//!
//! # State Transitions
//! ```text
//! Healthy/Unknown → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy/Unknown → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! Counters reset on every opposite outcome, so a single blip never flips
//! state.

use serde::Serialize;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

impl HealthState {
    /// Whether the load balancer may pick an instance in this state.
    pub fn is_selectable(self) -> bool {
        self != HealthState::Unhealthy
    }
}

/// A state change produced by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthState,
    pub to: HealthState,
}
