//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check backend names are unique and URLs parse
//! - Validate value ranges (intervals > 0, worker counts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid bind address '{value}'")]
    InvalidBindAddress { field: &'static str, value: String },

    #[error("backend '{0}' is defined more than once")]
    DuplicateBackend(String),

    #[error("backend '{name}': invalid base_url '{url}'")]
    InvalidBackendUrl { name: String, url: String },

    #[error("backend entry has an empty name")]
    EmptyBackendName,

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("continuation.retry_endpoint: invalid URL '{0}'")]
    InvalidRetryEndpoint(String),

    #[error("retries.base_delay_ms exceeds retries.max_delay_ms")]
    BackoffRange,
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.admin.enabled && config.admin.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress {
            field: "admin.bind_address",
            value: config.admin.bind_address.clone(),
        });
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if backend.name.trim().is_empty() {
            errors.push(ValidationError::EmptyBackendName);
        } else if !seen.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.name.clone()));
        }

        let parsed = url::Url::parse(&backend.base_url);
        if !matches!(parsed, Ok(ref u) if u.has_host()) {
            errors.push(ValidationError::InvalidBackendUrl {
                name: backend.name.clone(),
                url: backend.base_url.clone(),
            });
        }
    }

    if config.monitor.interval_secs == 0 {
        errors.push(ValidationError::ZeroValue("monitor.interval_secs"));
    }
    if config.monitor.timeout_secs == 0 {
        errors.push(ValidationError::ZeroValue("monitor.timeout_secs"));
    }
    if config.monitor.concurrency == 0 {
        errors.push(ValidationError::ZeroValue("monitor.concurrency"));
    }
    if config.cache.ttl_secs == 0 {
        errors.push(ValidationError::ZeroValue("cache.ttl_secs"));
    }
    if config.continuation.workers == 0 {
        errors.push(ValidationError::ZeroValue("continuation.workers"));
    }
    if config.continuation.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroValue("continuation.request_timeout_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroValue("timeouts.request_secs"));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::ZeroValue("listener.max_body_bytes"));
    }
    if config.listener.max_concurrent_requests == 0 {
        errors.push(ValidationError::ZeroValue("listener.max_concurrent_requests"));
    }

    if url::Url::parse(&config.continuation.retry_endpoint).is_err() {
        errors.push(ValidationError::InvalidRetryEndpoint(
            config.continuation.retry_endpoint.clone(),
        ));
    }

    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::BackoffRange);
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
    use crate::config::schema::BackendConfig;

    fn backend(name: &str, url: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            base_url: url.to_string(),
            routing_group: "adhoc".to_string(),
            active: true,
            dialect: Default::default(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.backends = vec![
            backend("a", "http://a:8080"),
            backend("a", "http://a2:8080"),
            backend("b", "not a url"),
        ];
        config.monitor.concurrency = 0;
        config.continuation.workers = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateBackend("a".into())));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidBackendUrl { name, .. } if name == "b")));
        assert!(errors.contains(&ValidationError::ZeroValue("monitor.concurrency")));
        assert!(errors.contains(&ValidationError::ZeroValue("continuation.workers")));
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_bad_bind_address() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "localhost".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidBindAddress { .. }));
    }
}
