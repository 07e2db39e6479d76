//! Client configuration and the retry policy object.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::TransportError;

/// Default backoff staircase between attempts.
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 3] = [420, 900, 1800];

/// Retry policy: an explicit staircase of delays plus the retryable
/// predicate. The transport performs `1 + delays.len()` attempts at most.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before retry N is `delays[N - 1]`.
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: DEFAULT_RETRY_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    /// Total number of attempts the transport may make.
    pub fn max_attempts(&self) -> usize {
        1 + self.delays.len()
    }

    /// Staircase delay before the given retry (0-based), saturating on the
    /// last configured step.
    pub fn delay_for(&self, retry: usize) -> Duration {
        self.delays
            .get(retry)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the error class is worth another attempt.
    pub fn is_retryable(&self, err: &TransportError) -> bool {
        err.is_retryable()
    }
}

/// Configuration for [`crate::transport::ResilientTransport`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, without trailing slash.
    pub base_url: String,
    /// BCP 47 locale, also sent as `Accept-Language`.
    pub locale: String,
    /// IANA timezone name sent with every turn request.
    pub timezone: String,
    /// Static headers applied to every request (between built-in defaults
    /// and per-call headers).
    pub static_headers: HashMap<String, String>,
    /// Connection-establishment timeout.
    pub connect_timeout: Duration,
    /// Total time budget for a single attempt.
    pub attempt_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            locale: "de".to_string(),
            timezone: "Europe/Berlin".to_string(),
            static_headers: HashMap::new(),
            connect_timeout: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(20),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = tz.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_headers.insert(name.into().to_lowercase(), value.into());
        self
    }
}
