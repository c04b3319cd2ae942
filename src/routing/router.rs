//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for a request path
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction; hot reload swaps the whole table
//! - Longest matching prefix wins, ties keep declaration order
//! - Explicit NoMatch rather than silent default

use std::sync::Arc;
use std::time::Duration;

use axum::http::Uri;
use url::Url;

use crate::config::RouteConfig;
use crate::resilience::RetryPolicy;
use crate::routing::matcher::PathPrefixMatcher;

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub service: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub allow_last_resort: bool,
    pub fallback: Option<Url>,
}

impl Route {
    pub fn from_config(config: &RouteConfig) -> Self {
        let fallback = config.fallback_url.as_deref().and_then(|raw| match Url::parse(raw) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(route = %config.name, error = %e, "Ignoring invalid fallback URL");
                None
            }
        });
        Self {
            name: if config.name.is_empty() { config.service.clone() } else { config.name.clone() },
            service: config.service.clone(),
            timeout: config.timeout(),
            retry: RetryPolicy::from_route(config),
            allow_last_resort: config.allow_last_resort,
            fallback,
        }
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    /// Rewritten path plus the original query string.
    pub upstream_path: String,
}

/// Path-prefix routing table.
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: Vec<(PathPrefixMatcher, Arc<Route>)>,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig]) -> Self {
        let mut entries = Vec::new();
        for config in routes {
            let route = Arc::new(Route::from_config(config));
            for rewrite in &config.path_rewrite {
                entries.push((
                    PathPrefixMatcher::new(rewrite.prefix.as_str(), rewrite.replacement.as_str()),
                    route.clone(),
                ));
            }
        }
        // Stable sort keeps declaration order among equal-length prefixes.
        entries.sort_by(|a, b| b.0.prefix().len().cmp(&a.0.prefix().len()));
        Self { entries }
    }

    pub fn resolve(&self, uri: &Uri) -> Option<RouteMatch> {
        let path = uri.path();
        self.entries.iter().find_map(|(matcher, route)| {
            let mut upstream_path = matcher.rewrite(path)?;
            if let Some(query) = uri.query() {
                upstream_path.push('?');
                upstream_path.push_str(query);
            }
            Some(RouteMatch {
                route: route.clone(),
                upstream_path,
            })
        })
    }

    /// Distinct routes in declaration order of their longest prefix.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        let mut seen: Vec<Arc<Route>> = Vec::new();
        for (_, route) in &self.entries {
            if !seen.iter().any(|r| Arc::ptr_eq(r, route)) {
                seen.push(route.clone());
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathRewrite;

    fn route(name: &str, service: &str, prefixes: &[(&str, &str)]) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            service: service.into(),
            path_rewrite: prefixes
                .iter()
                .map(|(p, r)| PathRewrite {
                    prefix: p.to_string(),
                    replacement: r.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = RouteTable::from_config(&[
            route("api", "banking", &[("/api", "/api")]),
            route("nlu", "nlu", &[("/api/nlu", "")]),
        ]);
        assert_eq!(table.len(), 2);

        let m = table.resolve(&Uri::from_static("/api/nlu/parse?lang=en")).unwrap();
        assert_eq!(m.route.service, "nlu");
        assert_eq!(m.upstream_path, "/parse?lang=en");

        let m = table.resolve(&Uri::from_static("/api/accounts")).unwrap();
        assert_eq!(m.route.service, "banking");
        assert_eq!(m.upstream_path, "/api/accounts");
    }

    #[test]
    fn test_no_match() {
        let table = RouteTable::from_config(&[route("nlu", "nlu", &[("/nlu", "")])]);
        assert!(table.resolve(&Uri::from_static("/nlp/x")).is_none());
        assert!(table.resolve(&Uri::from_static("/nluish")).is_none());
    }

    #[test]
    fn test_route_defaults() {
        let mut config = route("", "banking", &[("/b", "")]);
        config.fallback_url = Some("not a url".into());
        let compiled = Route::from_config(&config);
        assert_eq!(compiled.name, "banking");
        assert!(compiled.fallback.is_none());
        assert_eq!(compiled.retry.max_attempts(), 3);
    }
}
