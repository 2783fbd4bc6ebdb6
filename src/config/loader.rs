//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::EdgeConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {name}: {value:?}")]
    Env { name: &'static str, value: String },

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

/// Load, apply environment overrides and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EdgeConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: EdgeConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay the recognized environment variables on top of the file config.
///
/// The lookup is injected so tests don't touch the process environment.
pub fn apply_env_overrides<F>(config: &mut EdgeConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = parse_env(&lookup, "NEXT_CACHE_DO_QUEUE_MAX_REVALIDATION")? {
        config.queue.max_revalidations = v;
    }
    if let Some(v) = parse_env(&lookup, "NEXT_CACHE_DO_QUEUE_REVALIDATION_TIMEOUT_MS")? {
        config.queue.revalidation_timeout_ms = v;
    }
    if let Some(v) = parse_env(&lookup, "NEXT_CACHE_DO_QUEUE_RETRY_INTERVAL_MS")? {
        config.queue.retry_interval_ms = v;
    }
    if let Some(v) = parse_env(&lookup, "NEXT_CACHE_DO_QUEUE_MAX_RETRIES")? {
        config.queue.max_retries = v;
    }
    if let Some(v) = lookup("NEXT_CACHE_DO_QUEUE_DISABLE_SQLITE") {
        config.queue.disable_sqlite = v == "true";
    }
    if let Some(v) = parse_env(&lookup, "NEXT_CACHE_DO_PURGE_BUFFER_TIME_IN_SECONDS")? {
        config.purge.buffer_time_in_seconds = v;
    }
    if let Some(v) = parse_env(&lookup, "MAX_REVALIDATE_CONCURRENCY")? {
        config.queue.max_revalidate_concurrency = v;
    }
    if let Some(v) = parse_env(&lookup, "EDGE_ENABLE_CACHE_INTERCEPTION")? {
        config.routing.enable_cache_interception = v;
    }
    if let Some(v) = parse_env(&lookup, "EDGE_MIDDLEWARE_HEADERS_OVERRIDE_NEXT_CONFIG")? {
        config.routing.middleware_headers_override_next_config = v;
    }
    if let Some(v) = lookup("CACHE_PURGE_ZONE_ID") {
        config.purge.zone_id = Some(v);
    }
    if let Some(v) = lookup("CACHE_PURGE_API_TOKEN") {
        config.purge.api_token = Some(v);
    }
    Ok(())
}

fn parse_env<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("NEXT_CACHE_DO_QUEUE_MAX_REVALIDATION", "8"),
            ("NEXT_CACHE_DO_QUEUE_DISABLE_SQLITE", "true"),
            ("MAX_REVALIDATE_CONCURRENCY", "3"),
            ("EDGE_ENABLE_CACHE_INTERCEPTION", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = EdgeConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.queue.max_revalidations, 8);
        assert!(config.queue.disable_sqlite);
        assert_eq!(config.queue.max_revalidate_concurrency, 3);
        assert!(config.routing.enable_cache_interception);
        // untouched
        assert_eq!(config.queue.max_retries, 6);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = EdgeConfig::default();
        let err = apply_env_overrides(&mut config, |k| {
            (k == "NEXT_CACHE_DO_QUEUE_MAX_RETRIES").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: "NEXT_CACHE_DO_QUEUE_MAX_RETRIES", .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.toml");
        fs::write(
            &path,
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [queue]
            max_revalidations = 2

            [[backends]]
            name = "next-1"
            group = "default"
            address = "127.0.0.1:3000"
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.queue.max_revalidations, 2);
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].max_connections, 100);
    }
}
