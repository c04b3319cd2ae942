//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of per-service fallback URL variables, e.g. `GATEWAY_FALLBACK_BANKING`.
pub const FALLBACK_ENV_PREFIX: &str = "GATEWAY_FALLBACK_";

/// Overrides `admin.api_key`.
pub const ADMIN_KEY_ENV: &str = "GATEWAY_ADMIN_KEY";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// Environment overrides are applied before validation.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content, std::env::vars())
}

/// Parse configuration text, apply overrides from `vars`, then validate.
pub fn parse_config<I>(content: &str, vars: I) -> Result<GatewayConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut config: GatewayConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, vars);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Environment variable name carrying the fallback URL for `service`.
pub fn fallback_env_key(service: &str) -> String {
    format!(
        "{}{}",
        FALLBACK_ENV_PREFIX,
        service.to_ascii_uppercase().replace('-', "_")
    )
}

/// Apply `GATEWAY_FALLBACK_<SERVICE>` and `GATEWAY_ADMIN_KEY` overrides.
///
/// A fallback variable applies to every route targeting that service and
/// wins over the file value.
pub fn apply_env_overrides<I>(config: &mut GatewayConfig, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        if key == ADMIN_KEY_ENV && !value.is_empty() {
            config.admin.api_key = value;
            continue;
        }
        if !key.starts_with(FALLBACK_ENV_PREFIX) || value.is_empty() {
            continue;
        }
        for route in config.routes.iter_mut() {
            if fallback_env_key(&route.service) == key {
                tracing::debug!(route = %route.name, service = %route.service, "Fallback URL taken from environment");
                route.fallback_url = Some(value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [gateway]
        name = "api-gateway"

        [[services]]
        name = "banking"
        instances = ["127.0.0.1:3005"]
        critical = true

        [[services]]
        name = "nlu-service"
        instances = ["127.0.0.1:3003"]

        [[routes]]
        name = "banking"
        service = "banking"
        path_rewrite = [{ prefix = "/api/banking", replacement = "/api" }]
        max_retries = 1

        [[routes]]
        name = "nlu"
        service = "nlu-service"
        path_rewrite = [{ prefix = "/api/nlu" }]
    "#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE, Vec::new()).unwrap();
        assert_eq!(config.services.len(), 2);
        assert!(config.services[0].critical);
        assert_eq!(config.routes[0].max_retries, 1);
        // Defaults fill the rest.
        assert_eq!(config.routes[1].max_retries, 2);
        assert_eq!(config.routes[1].retry_methods, vec!["GET", "HEAD"]);
        assert!(config.routes[0].fallback_url.is_none());
    }

    #[test]
    fn test_env_fallback_override() {
        let vars = vec![
            ("GATEWAY_FALLBACK_BANKING".to_string(), "http://fallback:9999".to_string()),
            ("GATEWAY_FALLBACK_NLU_SERVICE".to_string(), "http://nlu-backup:3003".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        let config = parse_config(SAMPLE, vars).unwrap();
        assert_eq!(config.routes[0].fallback_url.as_deref(), Some("http://fallback:9999"));
        assert_eq!(config.routes[1].fallback_url.as_deref(), Some("http://nlu-backup:3003"));
    }

    #[test]
    fn test_invalid_config_reports_validation() {
        let bad = r#"
            [[routes]]
            name = "orphan"
            service = "missing"
            path_rewrite = [{ prefix = "/x" }]
        "#;
        match parse_config(bad, Vec::new()) {
            Err(ConfigError::Validation(errors)) => assert!(!errors.is_empty()),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.gateway.name, "api-gateway");
    }
}
