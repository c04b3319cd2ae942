//! Service instance abstraction.
//!
//! # Responsibilities
//! - Represent a single network instance of a backend service
//! - Track in-flight requests (for least-connections selection)
//! - Track health state with hysteresis counters

use std::ops::Deref;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use url::Url;

use crate::health::state::{HealthState, Transition};
use crate::registry::RegistryError;

/// A single instance of a backend service.
#[derive(Debug)]
pub struct ServiceInstance {
    service: String,
    host: String,
    port: u16,
    /// Pre-calculated base URL.
    base_url: Url,

    /// Current health state, see [`HealthState`].
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
    /// Number of requests currently dispatched to this instance.
    active_requests: AtomicUsize,

    last_checked_at: Mutex<Option<DateTime<Utc>>>,
    unhealthy_since: Mutex<Option<Instant>>,
}

impl ServiceInstance {
    pub fn new(service: impl Into<String>, host: impl Into<String>, port: u16) -> Result<Self, RegistryError> {
        let service = service.into();
        let host = host.into();
        let authority = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        let base_url = Url::parse(&format!("http://{}", authority))
            .map_err(|_| RegistryError::InvalidAddress(authority.clone()))?;

        Ok(Self {
            service,
            host,
            port,
            base_url,
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            active_requests: AtomicUsize::new(0),
            last_checked_at: Mutex::new(None),
            unhealthy_since: Mutex::new(None),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// "host:port" as used for logging and the admin API.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Authority component for outbound URIs.
    pub fn authority(&self) -> &str {
        // Url always carries host and port for http URLs built in `new`.
        &self.base_url[url::Position::BeforeHost..url::Position::AfterPort]
    }

    pub fn matches(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    pub fn is_selectable(&self) -> bool {
        self.health().is_selectable()
    }

    /// An instance that is not (yet) unhealthy but has recent failures.
    pub fn is_suspect(&self) -> bool {
        self.health() != HealthState::Unhealthy && self.consecutive_failures.load(Ordering::Relaxed) > 0
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        *self.last_checked_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since the instance last turned unhealthy.
    pub fn unhealthy_for(&self) -> Option<std::time::Duration> {
        self.unhealthy_since
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|since| since.elapsed())
    }

    pub fn touch_checked(&self) {
        *self.last_checked_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    /// Mark the start of a dispatch. The guard decrements on drop.
    pub fn acquire(self: &Arc<Self>) -> InstanceGuard {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        InstanceGuard {
            instance: self.clone(),
        }
    }

    // --- Health Logic ---

    /// Report a successful request/check.
    pub fn mark_success(&self, healthy_threshold: usize) -> Option<Transition> {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        let current = self.health();
        if current == HealthState::Healthy {
            return None;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            return self.set_health(HealthState::Healthy);
        }
        None
    }

    /// Report a failed request/check.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> Option<Transition> {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        let current = self.health();
        if current == HealthState::Unhealthy {
            return None;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            return self.set_health(HealthState::Unhealthy);
        }
        None
    }

    /// Force a health state. Counters restart from zero.
    pub fn set_health(&self, to: HealthState) -> Option<Transition> {
        let from = HealthState::from(self.state.swap(to as u8, Ordering::Relaxed));
        if from == to {
            return None;
        }
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);

        let mut since = self.unhealthy_since.lock().unwrap_or_else(PoisonError::into_inner);
        *since = (to == HealthState::Unhealthy).then(Instant::now);

        Some(Transition { from, to })
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            host: self.host.clone(),
            port: self.port,
            health: self.health(),
            suspect: self.is_suspect(),
            active_requests: self.active_requests(),
            last_checked_at: self.last_checked_at(),
        }
    }
}

/// Serializable view of an instance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub host: String,
    pub port: u16,
    pub health: HealthState,
    pub suspect: bool,
    pub active_requests: usize,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// A RAII guard that tracks an in-flight request on an instance.
#[derive(Debug)]
pub struct InstanceGuard {
    instance: Arc<ServiceInstance>,
}

impl Deref for InstanceGuard {
    type Target = ServiceInstance;
    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.instance.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}
