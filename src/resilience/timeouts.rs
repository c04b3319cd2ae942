//! Request deadlines.
//!
//! A proxied request has one overall deadline; every upstream attempt gets
//! the smaller of the route timeout and what is left of that deadline, so
//! retries can never stretch a request past it.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Timeout for the next attempt.
    pub fn attempt_timeout(&self, route_timeout: Duration) -> Duration {
        route_timeout.min(self.remaining())
    }

    /// Whether waiting `delay` still leaves time for another attempt.
    pub fn allows(&self, delay: Duration) -> bool {
        self.remaining() > delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_capped_by_deadline() {
        let deadline = Deadline::after(Duration::from_secs(10));
        assert_eq!(deadline.attempt_timeout(Duration::from_secs(3)), Duration::from_secs(3));

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(deadline.attempt_timeout(Duration::from_secs(3)), Duration::from_secs(2));
        assert!(deadline.allows(Duration::from_secs(1)));
        assert!(!deadline.allows(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(deadline.is_expired());
    }
}
