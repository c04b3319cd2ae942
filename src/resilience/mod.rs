//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → circuit_breaker.rs (gate: is the service known-bad?)
//!     → timeouts.rs (per-attempt timeout bounded by request deadline)
//!     → On failure: retries.rs (classify, check route policy, delay)
//!     → circuit_breaker.rs (record outcome, open circuit past threshold)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retry safety per route is explicit configuration
//! - Breaker state is per service, never global

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitBreakers, CircuitOpen, CircuitState, Outcome};
pub use retries::{AttemptFailure, RetryPolicy};
pub use timeouts::Deadline;
