//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_threshold failures within the trailing window
//! Open → Half-Open: first request after cooldown
//! Half-Open → Closed: half_open_probe_limit consecutive probe successes
//! Half-Open → Open: any probe failure
//! ```
//!
//! One breaker per service. A breaker is consulted before the load balancer
//! so a known-bad service costs no registry work and no network round-trip.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{CircuitBreakerConfig, ServiceConfig};

/// Public view of the breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge value used in the Prometheus view.
    pub fn as_gauge(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BreakerState {
    Closed {
        successes: u32,
    },
    Open {
        opened_at: Instant,
        rejection_logged: bool,
    },
    HalfOpen {
        /// Probes let through in this half-open period.
        admitted: u32,
        successes: u32,
    },
}

impl BreakerState {
    fn kind(&self) -> CircuitState {
        match self {
            BreakerState::Closed { .. } => CircuitState::Closed,
            BreakerState::Open { .. } => CircuitState::Open,
            BreakerState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// How a request got past the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Regular traffic while closed.
    Normal,
    /// Recovery probe while half-open.
    Probe,
}

/// Result of one dispatch attempt, as reported to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Attempt abandoned before a result (caller went away, nothing sent).
    Cancelled,
}

/// Request short-circuited by an open breaker.
#[derive(Debug, Clone, Error)]
#[error("circuit open for service `{service}`")]
pub struct CircuitOpen {
    pub service: String,
    pub retry_after: Duration,
    /// First rejection of this open period.
    pub first_rejection: bool,
}

/// Breaker thresholds for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
    pub half_open_probe_limit: u32,
    pub client_errors_trip: bool,
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            window: Duration::from_millis(config.window_ms),
            cooldown: Duration::from_millis(config.cooldown_ms),
            half_open_probe_limit: config.half_open_probe_limit.max(1),
            client_errors_trip: config.client_errors_trip,
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    /// Failure times while closed, oldest first. Never longer than the threshold.
    failures: VecDeque<Instant>,
}

impl Inner {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) < window {
                break;
            }
            self.failures.pop_front();
        }
    }
}

/// Per-service circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
    opened_total: AtomicU64,
    rejected_total: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, settings: BreakerSettings) -> Self {
        let service = service.into();
        metrics::gauge!("gateway_circuit_state", "service" => service.clone())
            .set(f64::from(CircuitState::Closed.as_gauge()));
        Self {
            service,
            settings,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed { successes: 0 },
                failures: VecDeque::with_capacity(settings.failure_threshold as usize),
            }),
            opened_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state.kind()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask whether a dispatch attempt may be made now.
    pub fn try_acquire(&self) -> Result<Admission, CircuitOpen> {
        let now = Instant::now();
        let mut inner = self.lock();

        match inner.state {
            BreakerState::Closed { .. } => Ok(Admission::Normal),
            BreakerState::Open {
                opened_at,
                rejection_logged,
            } => {
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.settings.cooldown {
                    self.transition(
                        &mut inner,
                        BreakerState::HalfOpen {
                            admitted: 1,
                            successes: 0,
                        },
                    );
                    return Ok(Admission::Probe);
                }
                inner.state = BreakerState::Open {
                    opened_at,
                    rejection_logged: true,
                };
                Err(self.reject(self.settings.cooldown - elapsed, !rejection_logged))
            }
            BreakerState::HalfOpen { admitted, successes } => {
                if admitted < self.settings.half_open_probe_limit {
                    inner.state = BreakerState::HalfOpen {
                        admitted: admitted + 1,
                        successes,
                    };
                    Ok(Admission::Probe)
                } else {
                    Err(self.reject(Duration::ZERO, false))
                }
            }
        }
    }

    fn reject(&self, retry_after: Duration, first_rejection: bool) -> CircuitOpen {
        self.rejected_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gateway_circuit_rejections_total", "service" => self.service.clone())
            .increment(1);
        CircuitOpen {
            service: self.service.clone(),
            retry_after,
            first_rejection,
        }
    }

    /// Report the outcome of an admitted attempt.
    ///
    /// Outcomes of normal traffic that lands after the breaker left Closed
    /// are ignored; only probes drive a half-open breaker.
    pub fn record(&self, admission: Admission, outcome: Outcome) {
        let now = Instant::now();
        let mut inner = self.lock();

        match (inner.state, admission) {
            (BreakerState::Closed { successes }, Admission::Normal) => {
                inner.prune(now, self.settings.window);
                match outcome {
                    Outcome::Success => {
                        inner.state = BreakerState::Closed {
                            successes: successes.saturating_add(1),
                        };
                    }
                    Outcome::Failure => {
                        inner.failures.push_back(now);
                        if inner.failures.len() >= self.settings.failure_threshold as usize {
                            self.transition(
                                &mut inner,
                                BreakerState::Open {
                                    opened_at: now,
                                    rejection_logged: false,
                                },
                            );
                        }
                    }
                    Outcome::Cancelled => {}
                }
            }
            (BreakerState::HalfOpen { admitted, successes }, Admission::Probe) => match outcome {
                Outcome::Success => {
                    let successes = successes + 1;
                    if successes >= self.settings.half_open_probe_limit {
                        self.transition(&mut inner, BreakerState::Closed { successes: 0 });
                    } else {
                        inner.state = BreakerState::HalfOpen { admitted, successes };
                    }
                }
                Outcome::Failure => {
                    self.transition(
                        &mut inner,
                        BreakerState::Open {
                            opened_at: now,
                            rejection_logged: false,
                        },
                    );
                }
                Outcome::Cancelled => {
                    inner.state = BreakerState::HalfOpen {
                        admitted: admitted.saturating_sub(1),
                        successes,
                    };
                }
            },
            _ => {}
        }
    }

    fn transition(&self, inner: &mut Inner, next: BreakerState) {
        let from = inner.state.kind();
        let to = next.kind();
        debug_assert!(
            matches!(
                (from, to),
                (CircuitState::Closed, CircuitState::Open)
                    | (CircuitState::Open, CircuitState::HalfOpen)
                    | (CircuitState::HalfOpen, CircuitState::Closed)
                    | (CircuitState::HalfOpen, CircuitState::Open)
            ),
            "invalid breaker transition {:?} -> {:?}",
            from,
            to
        );
        inner.state = next;
        inner.failures.clear();

        match to {
            CircuitState::Open => {
                self.opened_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(service = %self.service, from = ?from, cooldown_ms = self.settings.cooldown.as_millis() as u64, "Circuit opened");
            }
            CircuitState::HalfOpen => {
                tracing::info!(service = %self.service, "Circuit half-open, probing");
            }
            CircuitState::Closed => {
                tracing::info!(service = %self.service, "Circuit closed");
            }
        }
        metrics::counter!(
            "gateway_circuit_transitions_total",
            "service" => self.service.clone(),
            "to" => format!("{:?}", to)
        )
        .increment(1);
        metrics::gauge!("gateway_circuit_state", "service" => self.service.clone())
            .set(f64::from(to.as_gauge()));
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let (state, recent_failures) = {
            let inner = self.lock();
            let recent = inner
                .failures
                .iter()
                .filter(|&&at| now.saturating_duration_since(at) < self.settings.window)
                .count();
            (inner.state, recent as u32)
        };
        let (failure_count, success_count, retry_after_ms) = match state {
            BreakerState::Closed { successes } => (recent_failures, successes, None),
            BreakerState::Open { opened_at, .. } => {
                let remaining = self
                    .settings
                    .cooldown
                    .saturating_sub(now.saturating_duration_since(opened_at));
                (0, 0, Some(remaining.as_millis() as u64))
            }
            BreakerState::HalfOpen { successes, .. } => (0, successes, None),
        };
        BreakerSnapshot {
            service: self.service.clone(),
            state: state.kind(),
            failure_count,
            success_count,
            failure_threshold: self.settings.failure_threshold,
            half_open_probe_limit: self.settings.half_open_probe_limit,
            retry_after_ms,
            opened_total: self.opened_total.load(Ordering::Relaxed),
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of a breaker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub half_open_probe_limit: u32,
    pub retry_after_ms: Option<u64>,
    pub opened_total: u64,
    pub rejected_total: u64,
}

/// Breakers keyed by service name.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    defaults: BreakerSettings,
    overrides: HashMap<String, BreakerSettings>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    pub fn new(defaults: &CircuitBreakerConfig, services: &[ServiceConfig]) -> Self {
        let overrides = services
            .iter()
            .filter_map(|s| {
                s.circuit_breaker
                    .as_ref()
                    .map(|cb| (s.name.clone(), BreakerSettings::from(cb)))
            })
            .collect();
        Self {
            defaults: BreakerSettings::from(defaults),
            overrides,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for `service`, created on first use.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(service) {
            return breaker.clone();
        }
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                let settings = self.overrides.get(service).copied().unwrap_or(self.defaults);
                Arc::new(CircuitBreaker::new(service, settings))
            })
            .clone()
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }
}
