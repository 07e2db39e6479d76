//! Error types for the reflection client.
//!
//! The transport surfaces a small closed taxonomy: network failures,
//! timeouts, typed HTTP errors and caller cancellation. Parse problems are
//! never errors anywhere in this crate — malformed payloads degrade to
//! `{"raw": ...}` / `{"output_text": ...}` maps instead.

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by [`crate::transport::ResilientTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level failure (DNS, connect refused, broken pipe).
    #[error("Network error: {message}")]
    Network { message: String },

    /// An attempt exceeded its configured time budget.
    #[error("Request timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    /// HTTP error response. Retryable for 429/408/5xx, terminal otherwise.
    #[error("HTTP {status} for {uri}: {message}")]
    Http {
        status: u16,
        message: String,
        uri: String,
        /// Response body, JSON-decoded when possible.
        body: Value,
    },

    /// The caller abandoned the request between attempts.
    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    /// Status code this error maps to: HTTP status, 408 for timeouts,
    /// -1 for socket failures and cancellation.
    pub fn status(&self) -> i32 {
        match self {
            TransportError::Http { status, .. } => i32::from(*status),
            TransportError::Timeout { .. } => 408,
            TransportError::Network { .. } | TransportError::Cancelled => -1,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network { .. } | TransportError::Timeout { .. } => true,
            TransportError::Http { status, .. } => {
                matches!(*status, 408 | 429) || (500..600).contains(status)
            }
            TransportError::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let http = |status| TransportError::Http {
            status,
            message: String::new(),
            uri: String::new(),
            body: Value::Null,
        };
        assert!(http(429).is_retryable());
        assert!(http(408).is_retryable());
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(!http(400).is_retryable());
        assert!(!http(401).is_retryable());
        assert!(!http(404).is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            TransportError::Network { message: "refused".into() }.status(),
            -1
        );
        assert_eq!(TransportError::Timeout { elapsed_ms: 2000 }.status(), 408);
        assert!(TransportError::Network { message: "x".into() }.is_retryable());
        assert!(TransportError::Timeout { elapsed_ms: 1 }.is_retryable());
        assert!(!TransportError::Cancelled.is_retryable());
    }
}
