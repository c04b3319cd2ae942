//! Route matching logic.
//!
//! # Responsibilities
//! - Match path prefixes on segment boundaries
//! - Rewrite the matched prefix to the backend path
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - `/api/bank` matches `/api/bank` and `/api/bank/x`, never `/api/banking`
//! - No regex to guarantee O(n) matching

/// Matches a path prefix and rewrites it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    prefix: String,
    replacement: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    /// Trailing slashes on the prefix are ignored (except for the root prefix).
    pub fn new(prefix: impl Into<String>, replacement: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        Self {
            prefix: if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() },
            replacement: replacement.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return path.starts_with('/');
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Rewrite `path` for the backend, or `None` if it does not match.
    pub fn rewrite(&self, path: &str) -> Option<String> {
        if !self.matches(path) {
            return None;
        }
        let rest = if self.prefix == "/" { path } else { &path[self.prefix.len()..] };

        let mut rewritten = self.replacement.trim_end_matches('/').to_string();
        rewritten.push_str(rest);
        if !rewritten.starts_with('/') {
            rewritten.insert(0, '/');
        }
        Some(rewritten)
    }
}
