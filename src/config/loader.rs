//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::{AppConfig, SourceConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Prefix shared by every recognized environment variable.
pub const ENV_PREFIX: &str = "AGGREGATOR_";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {value:?}")]
    Env { var: String, value: String },

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

/// Parse a TOML file without validating it.
pub fn read_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Build the effective configuration: optional TOML file, then process
/// environment overrides, then validation.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay `AGGREGATOR_*` variables onto `config`.
///
/// The lookup is injected so overrides can be exercised without touching the
/// process environment.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("BIND_ADDRESS") {
        config.listener.bind_address = v;
    }
    if let Some(v) = env.parse("REQUEST_TIMEOUT_SECS")? {
        config.timeouts.request_secs = v;
    }
    if let Some(v) = env.string("API_KEY") {
        config.auth.api_key = v;
    }
    if let Some(v) = env.string("SOURCES") {
        config.sources = parse_sources(&v);
    }

    if let Some(v) = env.parse("CACHE_FRESH_TTL_SECS")? {
        config.cache.fresh_ttl_secs = v;
    }
    if let Some(v) = env.parse("CACHE_STALE_GRACE_SECS")? {
        config.cache.stale_grace_secs = v;
    }
    if let Some(v) = env.parse("CACHE_MAX_BACKGROUND_REFRESHES")? {
        config.cache.max_background_refreshes = v;
    }

    if let Some(v) = env.parse("BREAKER_FAILURE_THRESHOLD")? {
        config.circuit_breaker.failure_threshold = v;
    }
    if let Some(v) = env.parse("BREAKER_COOLDOWN_SECS")? {
        config.circuit_breaker.cooldown_secs = v;
    }

    if let Some(v) = env.parse("FETCH_TIMEOUT_MS")? {
        config.fetch.timeout_ms = v;
    }
    if let Some(v) = env.parse("FETCH_DEADLINE_MS")? {
        config.fetch.deadline_ms = v;
    }
    if let Some(v) = env.parse("FETCH_CONCURRENCY")? {
        config.fetch.concurrency_limit = v;
    }

    if let Some(v) = env.parse("RETRY_MAX_ATTEMPTS")? {
        config.retries.max_attempts = v;
    }
    if let Some(v) = env.parse("RETRY_BASE_DELAY_MS")? {
        config.retries.base_delay_ms = v;
    }
    if let Some(v) = env.parse("RETRY_MAX_DELAY_MS")? {
        config.retries.max_delay_ms = v;
    }

    if let Some(v) = env.flag("RATE_LIMIT_ENABLED")? {
        config.rate_limit.enabled = v;
    }
    if let Some(v) = env.parse("RATE_LIMIT_REQUESTS")? {
        config.rate_limit.requests = v;
    }
    if let Some(v) = env.parse("RATE_LIMIT_WINDOW_SECS")? {
        config.rate_limit.window_secs = v;
    }
    if let Some(v) = env.list("TRUSTED_PROXIES") {
        config.rate_limit.trusted_proxies = v
            .iter()
            .map(|ip| {
                ip.parse().map_err(|_| ConfigError::Env {
                    var: format!("{ENV_PREFIX}TRUSTED_PROXIES"),
                    value: ip.clone(),
                })
            })
            .collect::<Result<_, _>>()?;
    }
    if let Some(v) = env.list("PROXY_HEADERS") {
        config.rate_limit.proxy_headers = v;
    }

    if let Some(v) = env.flag("SCHEDULER_ENABLED")? {
        config.scheduler.enabled = v;
    }
    if let Some(v) = env.parse("SCHEDULER_INTERVAL_SECS")? {
        config.scheduler.interval_secs = v;
    }

    if let Some(v) = env.string("LOG_LEVEL") {
        config.observability.log_level = v;
    }
    if let Some(v) = env.string("LOG_FORMAT") {
        config.observability.log_format = v;
    }
    if let Some(v) = env.flag("METRICS_ENABLED")? {
        config.observability.metrics_enabled = v;
    }
    if let Some(v) = env.string("METRICS_ADDRESS") {
        config.observability.metrics_address = v;
    }

    if let Some(v) = env.parse("AUDIT_CAPACITY")? {
        config.persistence.audit_capacity = v;
    }

    Ok(())
}

/// Parse `AGGREGATOR_SOURCES`: comma-separated `url` or `key=url` items.
pub fn parse_sources(raw: &str) -> Vec<SourceConfig> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once('=') {
            Some((key, url)) if !key.contains("://") => SourceConfig {
                key: Some(key.trim().to_string()),
                url: url.trim().to_string(),
                timeout_ms: None,
            },
            _ => SourceConfig::from_url(item),
        })
        .collect()
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{name}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        match self.string(name) {
            Some(raw) => raw.parse().map(Some).map_err(|_| ConfigError::Env {
                var: format!("{ENV_PREFIX}{name}"),
                value: raw,
            }),
            None => Ok(None),
        }
    }

    fn flag(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        match self.string(name) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::Env {
                    var: format!("{ENV_PREFIX}{name}"),
                    value: raw,
                }),
            },
            None => Ok(None),
        }
    }

    fn list(&self, name: &str) -> Option<Vec<String>> {
        self.string(name).map(|raw| {
            raw.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_env_overrides_applied() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            lookup(&[
                ("AGGREGATOR_API_KEY", "secret"),
                ("AGGREGATOR_CACHE_FRESH_TTL_SECS", "5"),
                ("AGGREGATOR_RATE_LIMIT_ENABLED", "false"),
                ("AGGREGATOR_TRUSTED_PROXIES", "10.0.0.1, 10.0.0.2"),
                ("AGGREGATOR_SCHEDULER_INTERVAL_SECS", "30"),
            ]),
        )
        .unwrap();

        assert_eq!(config.auth.api_key, "secret");
        assert_eq!(config.cache.fresh_ttl_secs, 5);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.trusted_proxies.len(), 2);
        assert_eq!(config.scheduler.interval_secs, 30);
        // Untouched sections keep their defaults
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(
            &mut config,
            lookup(&[("AGGREGATOR_RETRY_MAX_ATTEMPTS", "many")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "AGGREGATOR_RETRY_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_parse_sources_with_and_without_keys() {
        let sources = parse_sources("posts=https://a.test/p, https://b.test/users ,");
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].key.as_deref(), Some("posts"));
        assert_eq!(sources[0].url, "https://a.test/p");
        assert_eq!(sources[1].key, None);
        assert_eq!(sources[1].url, "https://b.test/users");
    }

    #[test]
    fn test_toml_sections_default_when_missing() {
        let config: AppConfig = toml::from_str(
            r#"
            [auth]
            api_key = "k"

            [[sources]]
            key = "posts"
            url = "http://127.0.0.1:9000/posts"
            "#,
        )
        .unwrap();

        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.cache.stale_grace_secs, 60);
        assert!(validate_config(&config).is_ok());
    }
}
