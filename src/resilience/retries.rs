//! Retry logic.
//!
//! # Responsibilities
//! - Classify a failed attempt (network, timeout, upstream status)
//! - Decide whether the route permits retrying this method
//! - Compute the delay before the next attempt
//!
//! Retry safety is configured per route: methods listed in
//! `retry_methods` (GET/HEAD by default) are retried, everything else only
//! when the route is marked `idempotent`.

use std::collections::HashSet;
use std::time::Duration;

use axum::http::{Method, StatusCode};

use crate::config::{RetryBackoff, RouteConfig};
use crate::error::NetworkErrorCode;
use crate::resilience::backoff::exponential_delay;

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// Connection-level failure before a response arrived.
    Network { code: NetworkErrorCode, detail: String },
    /// No response within the attempt timeout.
    Timeout,
    /// The backend answered with an error status.
    Status(StatusCode),
}

impl AttemptFailure {
    pub fn code(&self) -> &'static str {
        match self {
            AttemptFailure::Network { code, .. } => code.as_str(),
            AttemptFailure::Timeout => NetworkErrorCode::TimedOut.as_str(),
            AttemptFailure::Status(status) if status.is_client_error() => "UPSTREAM_CLIENT_ERROR",
            AttemptFailure::Status(_) => "UPSTREAM_SERVER_ERROR",
        }
    }
}

/// Retry policy compiled from a route.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
    max_delay: Duration,
    backoff: RetryBackoff,
    error_codes: HashSet<NetworkErrorCode>,
    status_codes: HashSet<u16>,
    methods: Vec<Method>,
    idempotent: bool,
}

impl RetryPolicy {
    pub fn from_route(route: &RouteConfig) -> Self {
        Self {
            max_retries: route.max_retries,
            delay: Duration::from_millis(route.retry_delay_ms),
            max_delay: Duration::from_millis(route.max_retry_delay_ms),
            backoff: route.retry_backoff,
            error_codes: route.retryable_error_codes.iter().copied().collect(),
            status_codes: route.retryable_status_codes.iter().copied().collect(),
            methods: route
                .retry_methods
                .iter()
                .filter_map(|m| m.parse().ok())
                .collect(),
            idempotent: route.idempotent,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether requests with `method` may be sent more than once on this route.
    pub fn permits_method(&self, method: &Method) -> bool {
        self.idempotent || self.methods.contains(method)
    }

    /// Whether this kind of failure is worth another attempt.
    pub fn is_retryable(&self, failure: &AttemptFailure) -> bool {
        match failure {
            AttemptFailure::Network { code, .. } => self.error_codes.contains(code),
            AttemptFailure::Timeout => self.error_codes.contains(&NetworkErrorCode::TimedOut),
            // Client errors are never retried.
            AttemptFailure::Status(status) if status.is_client_error() => false,
            AttemptFailure::Status(status) => {
                status.is_server_error() && self.status_codes.contains(&status.as_u16())
            }
        }
    }

    /// Decide after attempt number `attempt` (1-based) failed.
    pub fn should_retry(&self, method: &Method, failure: &AttemptFailure, attempt: u32) -> bool {
        attempt <= self.max_retries && self.permits_method(method) && self.is_retryable(failure)
    }

    /// Delay before the attempt following `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.delay,
            RetryBackoff::Exponential => exponential_delay(attempt, self.delay, self.max_delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::from_route(&RouteConfig {
            max_retries,
            ..Default::default()
        })
    }

    fn refused() -> AttemptFailure {
        AttemptFailure::Network {
            code: NetworkErrorCode::ConnectionRefused,
            detail: "connection refused".into(),
        }
    }

    #[test]
    fn test_attempt_budget() {
        let p = policy(2);
        assert_eq!(p.max_attempts(), 3);
        assert!(p.should_retry(&Method::GET, &refused(), 1));
        assert!(p.should_retry(&Method::GET, &refused(), 2));
        assert!(!p.should_retry(&Method::GET, &refused(), 3));
    }

    #[test]
    fn test_classification() {
        let p = policy(2);
        assert!(p.is_retryable(&refused()));
        assert!(p.is_retryable(&AttemptFailure::Timeout));
        assert!(p.is_retryable(&AttemptFailure::Status(StatusCode::BAD_GATEWAY)));
        assert!(!p.is_retryable(&AttemptFailure::Status(StatusCode::NOT_FOUND)));
        assert!(!p.is_retryable(&AttemptFailure::Status(StatusCode::TOO_MANY_REQUESTS)));
        assert!(!p.is_retryable(&AttemptFailure::Status(StatusCode::NOT_IMPLEMENTED)));
    }

    #[test]
    fn test_method_safety_is_explicit() {
        let p = policy(2);
        assert!(!p.should_retry(&Method::POST, &refused(), 1));

        let marked = RetryPolicy::from_route(&RouteConfig {
            idempotent: true,
            ..Default::default()
        });
        assert!(marked.should_retry(&Method::POST, &refused(), 1));

        let put_only = RetryPolicy::from_route(&RouteConfig {
            retry_methods: vec!["PUT".into()],
            ..Default::default()
        });
        assert!(put_only.permits_method(&Method::PUT));
        assert!(!put_only.permits_method(&Method::GET));
    }

    #[test]
    fn test_fixed_delay() {
        let p = RetryPolicy::from_route(&RouteConfig {
            retry_delay_ms: 250,
            ..Default::default()
        });
        assert_eq!(p.delay_for(1), Duration::from_millis(250));
        assert_eq!(p.delay_for(4), Duration::from_millis(250));
    }
}
