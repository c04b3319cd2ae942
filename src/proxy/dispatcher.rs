//! Dispatch loop: breaker gate, instance selection, forwarding, retries.
//!
//! # Data Flow
//! ```text
//! for each attempt:
//!     breaker.try_acquire()          (open → fallback or 503)
//!     balancer.select_instance()     (none → last resort → fallback or 503)
//!     upstream.send()                (bounded by route timeout and request deadline)
//!     breaker.record(outcome)        (every attempt, success or not)
//!     retry policy                   (classify, method safety, budget, delay)
//! ```
//!
//! Attempts are strictly sequential. Dropping the dispatch future (caller
//! went away) records a cancelled outcome through the guards below.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{request, HeaderValue, Request, Response};
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::health::PassiveHealth;
use crate::load_balancer::{LoadBalancer, Selected};
use crate::observability::metrics::{self, MetricsAggregator, StatusClass};
use crate::proxy::context::ProxyRequestContext;
use crate::proxy::upstream::{self, UpstreamClient};
use crate::resilience::{Admission, AttemptFailure, CircuitBreaker, CircuitBreakers, Deadline, Outcome};
use crate::routing::RouteMatch;

pub const X_GATEWAY_FALLBACK: &str = "x-gateway-fallback";

/// Reports an attempt's outcome to its breaker exactly once.
struct AttemptGuard {
    breaker: Arc<CircuitBreaker>,
    admission: Admission,
    finished: bool,
}

impl AttemptGuard {
    fn new(breaker: Arc<CircuitBreaker>, admission: Admission) -> Self {
        Self {
            breaker,
            admission,
            finished: false,
        }
    }

    fn finish(mut self, outcome: Outcome) {
        self.finished = true;
        self.breaker.record(self.admission, outcome);
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.record(self.admission, Outcome::Cancelled);
        }
    }
}

/// Records the request-level metric exactly once.
struct OutcomeGuard<'a> {
    metrics: &'a MetricsAggregator,
    service: &'a str,
    request_id: &'a str,
    session_id: Option<&'a str>,
    started: Instant,
    finished: bool,
}

impl OutcomeGuard<'_> {
    fn finish(mut self, class: StatusClass) {
        self.finished = true;
        self.metrics.record_outcome(self.service, class, self.started.elapsed());
    }
}

impl Drop for OutcomeGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(request_id = %self.request_id, session_id = ?self.session_id, service = %self.service, "Request cancelled by caller");
            self.metrics
                .record_outcome(self.service, StatusClass::Cancelled, self.started.elapsed());
        }
    }
}

pub struct Dispatcher {
    balancer: Arc<LoadBalancer>,
    breakers: Arc<CircuitBreakers>,
    metrics: Arc<MetricsAggregator>,
    passive: PassiveHealth,
    client: UpstreamClient,
    gateway: String,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        balancer: Arc<LoadBalancer>,
        breakers: Arc<CircuitBreakers>,
        metrics: Arc<MetricsAggregator>,
        passive: PassiveHealth,
        client: UpstreamClient,
        gateway: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            balancer,
            breakers,
            metrics,
            passive,
            client,
            gateway: gateway.into(),
            request_timeout,
        }
    }

    /// Dispatch one proxied request and record its outcome.
    pub async fn dispatch(
        &self,
        ctx: &mut ProxyRequestContext,
        route: &RouteMatch,
        parts: request::Parts,
        body: Bytes,
    ) -> Result<Response<Body>, GatewayError> {
        let request_id = ctx.request_id.clone();
        let session_id = ctx.session_id.clone();
        let guard = OutcomeGuard {
            metrics: &self.metrics,
            service: &route.route.service,
            request_id: &request_id,
            session_id: session_id.as_deref(),
            started: ctx.started_at,
            finished: false,
        };

        let result = self.run(ctx, route, &parts, &body).await;

        let class = match &result {
            Ok(response) => StatusClass::from_status(response.status()),
            Err(err) => StatusClass::from_status(err.status()),
        };
        guard.finish(class);
        result
    }

    async fn run(
        &self,
        ctx: &mut ProxyRequestContext,
        route: &RouteMatch,
        parts: &request::Parts,
        body: &Bytes,
    ) -> Result<Response<Body>, GatewayError> {
        let service = route.route.service.as_str();
        let policy = &route.route.retry;
        let breaker = self.breakers.get(service);
        let deadline = Deadline::after(self.request_timeout);
        let mut last_failure: Option<GatewayError> = None;

        loop {
            if deadline.is_expired() {
                tracing::warn!(request_id = %ctx.request_id, session_id = ?ctx.session_id, service = %service, attempts = ctx.attempt, "Request deadline elapsed");
                return Err(GatewayError::Timeout {
                    service: service.to_string(),
                });
            }

            // 1. Breaker gate.
            let admission = match breaker.try_acquire() {
                Ok(admission) => admission,
                Err(open) => {
                    if open.first_rejection {
                        tracing::warn!(request_id = %ctx.request_id, service = %service, retry_after_ms = open.retry_after.as_millis() as u64, "Circuit open, short-circuiting");
                    } else {
                        tracing::debug!(request_id = %ctx.request_id, service = %service, "Circuit open, short-circuiting");
                    }
                    if let Some(failure) = last_failure {
                        return Err(failure);
                    }
                    let err = GatewayError::CircuitOpen {
                        service: service.to_string(),
                        retry_after: open.retry_after,
                    };
                    return self.fallback_or(ctx, route, parts, body, &deadline, err).await;
                }
            };
            let attempt_guard = AttemptGuard::new(breaker.clone(), admission);

            // 2. Instance selection.
            let selected = match self.select(route, service) {
                Ok(selected) => selected,
                Err(err) => {
                    // Nothing was sent; the admission is released.
                    drop(attempt_guard);
                    if let GatewayError::ServiceNotRegistered(_) = &err {
                        tracing::error!(request_id = %ctx.request_id, service = %service, "Route targets a service missing from the registry");
                    }
                    if let Some(failure) = last_failure {
                        return Err(failure);
                    }
                    return self.fallback_or(ctx, route, parts, body, &deadline, err).await;
                }
            };

            // 3. Forward.
            let request = upstream::build_request(
                parts,
                body,
                selected.base_url(),
                &route.upstream_path,
                ctx,
                &self.gateway,
            )?;
            ctx.attempt += 1;
            let timeout = deadline.attempt_timeout(route.route.timeout);
            tracing::debug!(
                request_id = %ctx.request_id,
                service = %service,
                instance = %selected.address(),
                attempt = ctx.attempt,
                last_resort = selected.last_resort,
                "Forwarding request"
            );

            // 4./5. Classify.
            let failure = match self.client.send(request, timeout).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_client_error() {
                        let outcome = if breaker.settings().client_errors_trip {
                            Outcome::Failure
                        } else {
                            Outcome::Success
                        };
                        attempt_guard.finish(outcome);
                        metrics::record_attempt(service, "client_error");
                        return Err(GatewayError::UpstreamClient {
                            service: service.to_string(),
                            status,
                            response,
                        });
                    }
                    if !status.is_server_error() {
                        attempt_guard.finish(Outcome::Success);
                        self.passive.observe_success(&selected);
                        metrics::record_attempt(service, "success");
                        return Ok(response);
                    }

                    attempt_guard.finish(Outcome::Failure);
                    self.passive.observe_failure(&selected);
                    last_failure = Some(GatewayError::UpstreamServer {
                        service: service.to_string(),
                        status,
                        response,
                    });
                    AttemptFailure::Status(status)
                }
                Err(failure) => {
                    attempt_guard.finish(Outcome::Failure);
                    self.passive.observe_failure(&selected);
                    last_failure = Some(match &failure {
                        AttemptFailure::Network { code, detail } => GatewayError::Network {
                            service: service.to_string(),
                            code: *code,
                            detail: detail.clone(),
                        },
                        _ => GatewayError::Timeout {
                            service: service.to_string(),
                        },
                    });
                    failure
                }
            };

            let instance = selected.address();
            drop(selected);
            metrics::record_attempt(service, failure.code());
            tracing::warn!(
                request_id = %ctx.request_id,
                service = %service,
                instance = %instance,
                attempt = ctx.attempt,
                code = failure.code(),
                detail = ?failure,
                "Upstream attempt failed"
            );

            // 6. Retry decision.
            if !policy.should_retry(&parts.method, &failure, ctx.attempt) {
                break;
            }
            let delay = policy.delay_for(ctx.attempt);
            if !deadline.allows(delay) {
                tracing::debug!(request_id = %ctx.request_id, service = %service, "No time left for another attempt");
                break;
            }
            tracing::info!(request_id = %ctx.request_id, session_id = ?ctx.session_id, service = %service, attempt = ctx.attempt, delay = ?delay, "Retrying request");
            tokio::time::sleep(delay).await;
        }

        // 7. Exhausted or not retryable.
        if deadline.is_expired() {
            return Err(GatewayError::Timeout {
                service: service.to_string(),
            });
        }
        Err(last_failure.unwrap_or_else(|| GatewayError::Timeout {
            service: service.to_string(),
        }))
    }

    fn select(&self, route: &RouteMatch, service: &str) -> Result<Selected, GatewayError> {
        match self.balancer.select_instance(service) {
            Err(GatewayError::NoHealthyInstance(_)) if route.route.allow_last_resort => {
                self.balancer.select_last_resort(service)
            }
            other => other,
        }
    }

    /// Serve from the route's fallback URL when the service cannot produce
    /// an instance, otherwise surface `err`.
    async fn fallback_or(
        &self,
        ctx: &ProxyRequestContext,
        route: &RouteMatch,
        parts: &request::Parts,
        body: &Bytes,
        deadline: &Deadline,
        err: GatewayError,
    ) -> Result<Response<Body>, GatewayError> {
        let eligible = matches!(
            err,
            GatewayError::CircuitOpen { .. } | GatewayError::NoHealthyInstance(_)
        );
        let Some(fallback) = route.route.fallback.as_ref().filter(|_| eligible) else {
            return Err(err);
        };

        let request: Request<Body> = match upstream::build_request(
            parts,
            body,
            fallback,
            &route.upstream_path,
            ctx,
            &self.gateway,
        ) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id, error = %e, "Cannot build fallback request");
                return Err(err);
            }
        };

        match self
            .client
            .send(request, deadline.attempt_timeout(route.route.timeout))
            .await
        {
            Ok(mut response) => {
                tracing::info!(request_id = %ctx.request_id, service = %ctx.target_service, reason = err.code(), "Served from fallback");
                response
                    .headers_mut()
                    .insert(X_GATEWAY_FALLBACK, HeaderValue::from_static("true"));
                Ok(response)
            }
            Err(failure) => {
                tracing::warn!(request_id = %ctx.request_id, service = %ctx.target_service, code = failure.code(), "Fallback failed");
                Err(err)
            }
        }
    }
}
