//! Retry classification.
//!
//! Timeouts, network errors and 5xx are retried. 4xx and undecodable bodies
//! are permanent: the same request would fail the same way.

use crate::fetch::{ErrorClass, FetchError};

/// Whether a failed attempt may be retried.
pub fn is_retryable(error: &FetchError) -> bool {
    error.class() == ErrorClass::Transient
}

/// Classify an upstream status code. `None` means success.
pub fn classify_status(status: u16) -> Option<FetchError> {
    match status {
        200..=299 => None,
        _ => Some(FetchError::Http { status }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transient_errors_retryable() {
        assert!(is_retryable(&FetchError::Timeout(Duration::from_secs(1))));
        assert!(is_retryable(&FetchError::Network("reset".into())));
        assert!(is_retryable(&FetchError::Http { status: 502 }));
    }

    #[test]
    fn test_permanent_errors_not_retryable() {
        assert!(!is_retryable(&FetchError::Http { status: 404 }));
        assert!(!is_retryable(&FetchError::Http { status: 429 }));
        assert!(!is_retryable(&FetchError::Decode("eof".into())));
        assert!(!is_retryable(&FetchError::CircuitOpen));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(204), None);
        assert_eq!(classify_status(503), Some(FetchError::Http { status: 503 }));
        assert_eq!(classify_status(301), Some(FetchError::Http { status: 301 }));
    }
}
