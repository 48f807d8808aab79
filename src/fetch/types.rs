//! Source descriptors, fetch results, and fetch error taxonomy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::SourceConfig;

/// Records returned by one source. A single JSON object upstream becomes a
/// one-element list.
pub type Records = Vec<serde_json::Value>;

/// Identifies one external data source. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescriptor {
    pub key: String,
    pub endpoint: Url,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

/// Reasons a [`SourceConfig`] cannot become a [`SourceDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("cannot derive a key from '{0}', set one explicitly")]
    MissingKey(String),
}

impl SourceDescriptor {
    /// Build a descriptor, deriving the key from the last path segment when
    /// the config does not name one.
    pub fn from_config(config: &SourceConfig, default_timeout: Duration) -> Result<Self, SourceError> {
        let endpoint = Url::parse(&config.url).map_err(|e| SourceError::InvalidUrl {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;

        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(SourceError::UnsupportedScheme(endpoint.scheme().to_string()));
        }

        let key = match config.key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => derive_key(&endpoint).ok_or_else(|| SourceError::MissingKey(config.url.clone()))?,
        };

        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);

        Ok(Self { key, endpoint, timeout })
    }
}

fn derive_key(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

/// Coarse classification used by retry logic and failure manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Timeouts, network errors, 5xx. Retried by the fetcher.
    Transient,
    /// 4xx and undecodable bodies. Never retried.
    Permanent,
    /// Source skipped by its circuit breaker; no attempt was made.
    CircuitOpen,
}

/// Errors from fetching a single source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("upstream returned HTTP {status}")]
    Http { status: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid JSON payload: {0}")]
    Decode(String),

    #[error("circuit open, upstream unavailable")]
    CircuitOpen,
}

impl FetchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) => ErrorClass::Transient,
            FetchError::Http { status } if *status >= 500 => ErrorClass::Transient,
            FetchError::Http { .. } | FetchError::Decode(_) => ErrorClass::Permanent,
            FetchError::CircuitOpen => ErrorClass::CircuitOpen,
        }
    }
}

/// Outcome of one logical fetch of one source.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub source_key: String,
    pub outcome: Result<Records, FetchError>,
    pub attempted_at: DateTime<Utc>,
    pub duration: Duration,
    /// Attempts made; zero when the circuit breaker skipped the source.
    pub attempts: u32,
}

impl FetchResult {
    pub fn skipped(source: &SourceDescriptor) -> Self {
        Self {
            source_key: source.key.clone(),
            outcome: Err(FetchError::CircuitOpen),
            attempted_at: Utc::now(),
            duration: Duration::ZERO,
            attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

pub(crate) mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_derived_from_last_segment() {
        let cfg = SourceConfig::from_url("https://jsonplaceholder.typicode.com/posts/");
        let d = SourceDescriptor::from_config(&cfg, Duration::from_secs(8)).unwrap();
        assert_eq!(d.key, "posts");
        assert_eq!(d.timeout, Duration::from_secs(8));
    }

    #[test]
    fn test_explicit_key_and_timeout_win() {
        let cfg = SourceConfig {
            key: Some("people".into()),
            url: "http://127.0.0.1:9000/users".into(),
            timeout_ms: Some(250),
        };
        let d = SourceDescriptor::from_config(&cfg, Duration::from_secs(8)).unwrap();
        assert_eq!(d.key, "people");
        assert_eq!(d.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_bad_sources() {
        let bad_scheme = SourceConfig::from_url("ftp://example.com/x");
        assert!(matches!(
            SourceDescriptor::from_config(&bad_scheme, Duration::from_secs(1)),
            Err(SourceError::UnsupportedScheme(_))
        ));

        let no_path = SourceConfig::from_url("http://example.com/");
        assert!(matches!(
            SourceDescriptor::from_config(&no_path, Duration::from_secs(1)),
            Err(SourceError::MissingKey(_))
        ));
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(FetchError::Http { status: 503 }.class(), ErrorClass::Transient);
        assert_eq!(FetchError::Http { status: 404 }.class(), ErrorClass::Permanent);
        assert_eq!(FetchError::Timeout(Duration::from_secs(1)).class(), ErrorClass::Transient);
        assert_eq!(FetchError::Decode("eof".into()).class(), ErrorClass::Permanent);
        assert_eq!(FetchError::CircuitOpen.class(), ErrorClass::CircuitOpen);
    }
}
