//! Configuration validation.
//!
//! Semantic checks run after deserialization: routes must reference
//! declared services, instance addresses must parse, thresholds must be
//! positive. All errors are returned, not just the first.

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::{GatewayConfig, RouteConfig};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("service `{0}` is declared more than once")]
    DuplicateService(String),

    #[error("service `{service}` has invalid instance address `{address}`")]
    InvalidInstance { service: String, address: String },

    #[error("route `{route}` targets unknown service `{service}`")]
    UnknownService { route: String, service: String },

    #[error("route `{0}` has no path_rewrite prefixes")]
    NoPrefixes(String),

    #[error("route `{route}` prefix `{prefix}` must start with '/'")]
    InvalidPrefix { route: String, prefix: String },

    #[error("route `{route}` has invalid fallback_url `{url}`")]
    InvalidFallback { route: String, url: String },

    #[error("route `{route}` lists unknown retry method `{method}`")]
    InvalidMethod { route: String, method: String },

    #[error("`{0}` must be greater than zero")]
    NotPositive(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut names = HashSet::new();

    for service in &config.services {
        if service.name.is_empty() {
            errors.push(ValidationError::EmptyServiceName);
        } else if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        for address in &service.instances {
            if parse_instance_address(address).is_none() {
                errors.push(ValidationError::InvalidInstance {
                    service: service.name.clone(),
                    address: address.clone(),
                });
            }
        }
        if let Some(cb) = &service.circuit_breaker {
            check_breaker(&format!("services.{}.circuit_breaker", service.name), cb, &mut errors);
        }
    }

    for route in &config.routes {
        validate_route(route, &names, &mut errors);
    }

    check_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);
    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::NotPositive("timeouts.request_ms".into()));
    }
    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push(ValidationError::NotPositive("health_check.interval_secs".into()));
    }
    if config.health_check.unhealthy_threshold == 0 || config.health_check.healthy_threshold == 0 {
        errors.push(ValidationError::NotPositive("health_check thresholds".into()));
    }
    if config.health_check.passive_failure_threshold == 0 {
        errors.push(ValidationError::NotPositive("health_check.passive_failure_threshold".into()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_route(route: &RouteConfig, services: &HashSet<&str>, errors: &mut Vec<ValidationError>) {
    if !services.contains(route.service.as_str()) {
        errors.push(ValidationError::UnknownService {
            route: route.name.clone(),
            service: route.service.clone(),
        });
    }
    if route.path_rewrite.is_empty() {
        errors.push(ValidationError::NoPrefixes(route.name.clone()));
    }
    for rule in &route.path_rewrite {
        if !rule.prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix {
                route: route.name.clone(),
                prefix: rule.prefix.clone(),
            });
        }
    }
    if let Some(url) = &route.fallback_url {
        let valid = Url::parse(url)
            .map(|u| u.scheme() == "http" && u.host_str().is_some())
            .unwrap_or(false);
        if !valid {
            errors.push(ValidationError::InvalidFallback {
                route: route.name.clone(),
                url: url.clone(),
            });
        }
    }
    for method in &route.retry_methods {
        if method.parse::<axum::http::Method>().is_err() {
            errors.push(ValidationError::InvalidMethod {
                route: route.name.clone(),
                method: method.clone(),
            });
        }
    }
    if route.timeout_ms == 0 {
        errors.push(ValidationError::NotPositive(format!("routes.{}.timeout_ms", route.name)));
    }
}

fn check_breaker(
    scope: &str,
    cb: &crate::config::schema::CircuitBreakerConfig,
    errors: &mut Vec<ValidationError>,
) {
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::NotPositive(format!("{scope}.failure_threshold")));
    }
    if cb.half_open_probe_limit == 0 {
        errors.push(ValidationError::NotPositive(format!("{scope}.half_open_probe_limit")));
    }
    if cb.window_ms == 0 {
        errors.push(ValidationError::NotPositive(format!("{scope}.window_ms")));
    }
}

/// Split "host:port" into its parts.
pub fn parse_instance_address(address: &str) -> Option<(String, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    if port == 0 {
        return None;
    }
    Some((host.to_string(), port))
}
