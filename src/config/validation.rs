//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (origin rules reference existing backend groups)
//! - Validate value ranges (timeouts > 0, shard counts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EdgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::EdgeConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address {0:?}")]
    BindAddress(String),

    #[error("backend {name} has invalid address {address:?}")]
    BackendAddress { name: String, address: String },

    #[error("origin rule {rule} references unknown backend group {group}")]
    UnknownGroup { rule: String, group: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("unknown {kind} {value:?}")]
    UnknownStrategy { kind: &'static str, value: String },

    #[error("purge page size {0} exceeds the upstream limit of 100")]
    PurgePageSize(usize),

    #[error("skew protection deployment {id} has invalid url {url:?}")]
    DeploymentUrl { id: String, url: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

pub fn validate_config(config: &EdgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    let mut groups = HashSet::new();
    for backend in &config.backends {
        if backend.address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::BackendAddress {
                name: backend.name.clone(),
                address: backend.address.clone(),
            });
        }
        groups.insert(backend.group.as_str());
    }
    for rule in &config.origins {
        if !groups.contains(rule.backend_group.as_str()) {
            errors.push(ValidationError::UnknownGroup {
                rule: rule.name.clone(),
                group: rule.backend_group.clone(),
            });
        }
    }

    let positive = [
        ("queue.max_revalidations", config.queue.max_revalidations as u64),
        ("queue.revalidation_timeout_ms", config.queue.revalidation_timeout_ms),
        ("queue.retry_interval_ms", config.queue.retry_interval_ms),
        ("queue.max_revalidate_concurrency", u64::from(config.queue.max_revalidate_concurrency)),
        ("tag_cache.shards", u64::from(config.tag_cache.shards)),
        ("purge.page_size", config.purge.page_size as u64),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ];
    for (name, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }
    if config.purge.page_size > 100 {
        errors.push(ValidationError::PurgePageSize(config.purge.page_size));
    }

    if !matches!(config.routing.incremental_cache.as_str(), "memory" | "filesystem") {
        errors.push(ValidationError::UnknownStrategy {
            kind: "incremental cache",
            value: config.routing.incremental_cache.clone(),
        });
    }
    if !matches!(config.health_check.strategy.as_str(), "round_robin" | "least_connections") {
        errors.push(ValidationError::UnknownStrategy {
            kind: "load balancing strategy",
            value: config.health_check.strategy.clone(),
        });
    }

    if config.skew_protection.enabled {
        if config.skew_protection.current_deployment_id.is_empty() {
            errors.push(ValidationError::Empty("skew_protection.current_deployment_id"));
        }
        for (id, url) in &config.skew_protection.deployments {
            if url::Url::parse(url).is_err() {
                errors.push(ValidationError::DeploymentUrl {
                    id: id.clone(),
                    url: url.clone(),
                });
            }
        }
    }
    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::Empty("admin.api_key"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BackendConfig, OriginRouteConfig};

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&EdgeConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = EdgeConfig::default();
        config.listener.bind_address = "nope".into();
        config.queue.max_revalidations = 0;
        config.backends.push(BackendConfig {
            name: "b1".into(),
            group: "web".into(),
            address: "localhost".into(),
            max_connections: 1,
        });
        config.origins.push(OriginRouteConfig {
            name: "api".into(),
            host: None,
            path_prefix: Some("/api".into()),
            backend_group: "api".into(),
            priority: 0,
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::Zero("queue.max_revalidations")));
        assert!(errors.contains(&ValidationError::UnknownGroup {
            rule: "api".into(),
            group: "api".into()
        }));
    }

    #[test]
    fn test_skew_protection_needs_deployment_urls() {
        let mut config = EdgeConfig::default();
        config.skew_protection.enabled = true;
        config
            .skew_protection
            .deployments
            .insert("dpl-1".into(), "not a url".into());

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::Empty("skew_protection.current_deployment_id")));
        assert!(errors.contains(&ValidationError::DeploymentUrl {
            id: "dpl-1".into(),
            url: "not a url".into()
        }));
    }
}
