//! Configuration validation.
//!
//! Semantic checks only; serde already handled syntax. Validation is a pure
//! function that reports every problem at once rather than stopping at the
//! first, and it runs before a config is accepted into the system.

use std::collections::HashSet;

use crate::config::schema::AppConfig;
use crate::fetch::SourceDescriptor;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate an [`AppConfig`], returning all errors found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.auth.api_key.trim().is_empty() {
        errors.push(ValidationError::new("auth.api_key", "must be set"));
    }

    if config.sources.is_empty() {
        errors.push(ValidationError::new("sources", "at least one source is required"));
    }

    let mut seen = HashSet::new();
    for (i, source) in config.sources.iter().enumerate() {
        match SourceDescriptor::from_config(source, config.fetch.timeout()) {
            Ok(descriptor) => {
                if !seen.insert(descriptor.key.clone()) {
                    errors.push(ValidationError::new(
                        format!("sources[{i}].key"),
                        format!("duplicate source key '{}'", descriptor.key),
                    ));
                }
            }
            Err(e) => errors.push(ValidationError::new(format!("sources[{i}]"), e.to_string())),
        }
        if source.timeout_ms == Some(0) {
            errors.push(ValidationError::new(format!("sources[{i}].timeout_ms"), "must be > 0"));
        }
    }

    let positive = [
        ("cache.fresh_ttl_secs", config.cache.fresh_ttl_secs),
        ("cache.max_background_refreshes", config.cache.max_background_refreshes as u64),
        ("circuit_breaker.failure_threshold", config.circuit_breaker.failure_threshold as u64),
        ("circuit_breaker.cooldown_secs", config.circuit_breaker.cooldown_secs),
        ("fetch.timeout_ms", config.fetch.timeout_ms),
        ("fetch.deadline_ms", config.fetch.deadline_ms),
        ("fetch.concurrency_limit", config.fetch.concurrency_limit as u64),
        ("retries.max_attempts", config.retries.max_attempts as u64),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("persistence.audit_capacity", config.persistence.audit_capacity as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }

    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    if config.rate_limit.enabled {
        if config.rate_limit.requests == 0 {
            errors.push(ValidationError::new("rate_limit.requests", "must be > 0"));
        }
        if config.rate_limit.window_secs == 0 {
            errors.push(ValidationError::new("rate_limit.window_secs", "must be > 0"));
        }
    }
    for header in &config.rate_limit.proxy_headers {
        if axum::http::HeaderName::from_bytes(header.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "rate_limit.proxy_headers",
                format!("'{header}' is not a valid header name"),
            ));
        }
    }

    if config.scheduler.enabled && config.scheduler.interval_secs == 0 {
        errors.push(ValidationError::new("scheduler.interval_secs", "must be > 0"));
    }

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            "must be a socket address like 0.0.0.0:8080",
        ));
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "must be 'pretty' or 'json'",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
