//! Resilient HTTP transport for the reflection backend.
//!
//! Executes one logical call as a sequence of attempts driven by an
//! explicit [`RetryPolicy`](crate::config::RetryPolicy): staircase backoff
//! with jitter, `Retry-After` compliance, separate connect and per-attempt
//! timeouts, and content negotiation. Whatever the server returns, the
//! caller sees one uniform JSON-map shape — parse failures degrade to
//! `{"raw": ...}`, non-JSON bodies to `{"output_text": ...}`.
//!
//! The transport holds no conversation state. Token provider, log sink,
//! jitter source and the HTTP executor itself are injected seams.

pub mod redact;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::TransportError;
use self::redact::redact;

pub use reqwest::Method;

const ACCEPT: &str =
    "application/json, application/problem+json;q=0.9, text/plain;q=0.8, */*;q=0.5";
const MAX_LOGGED_PATH: usize = 96;

// ---------------------------------------------------------------------------
// Injected seams
// ---------------------------------------------------------------------------

/// Supplies the bearer token, fetched fresh for every attempt. Caching is
/// the provider's concern, not the transport's.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Option<String>;
}

/// Provider for unauthenticated backends.
#[derive(Debug, Default)]
pub struct NoToken;

#[async_trait]
impl TokenProvider for NoToken {
    async fn token(&self) -> Option<String> {
        None
    }
}

/// Provider wrapping a fixed token string.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Fire-and-forget log sink. Implementations must never block or panic;
/// lines arrive already PII-redacted.
pub trait LogSink: Send + Sync {
    fn log(&self, line: &str);
}

/// Default sink forwarding to the `log` crate at debug level.
#[derive(Debug, Default)]
pub struct DebugLogSink;

impl LogSink for DebugLogSink {
    fn log(&self, line: &str) {
        log::debug!("{}", line);
    }
}

/// Scales a backoff delay. Injected so tests stay deterministic.
pub trait JitterSource: Send + Sync {
    fn apply(&self, base: Duration) -> Duration;
}

/// Uniform multiplicative jitter, ±20% by default.
#[derive(Debug, Clone)]
pub struct RandomJitter {
    pub spread: f64,
}

impl Default for RandomJitter {
    fn default() -> Self {
        Self { spread: 0.2 }
    }
}

impl JitterSource for RandomJitter {
    fn apply(&self, base: Duration) -> Duration {
        let factor = rand::thread_rng().gen_range(1.0 - self.spread..=1.0 + self.spread);
        base.mul_f64(factor)
    }
}

/// Pass-through jitter for tests.
#[derive(Debug, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn apply(&self, base: Duration) -> Duration {
        base
    }
}

// ---------------------------------------------------------------------------
// HTTP executor seam
// ---------------------------------------------------------------------------

/// One fully-prepared attempt.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    /// Header names lowercased; later layers already applied.
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub attempt_timeout: Duration,
}

/// Raw result of one attempt, before decoding.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub retry_after: Option<String>,
    pub body: String,
}

/// Executes a single prepared request. The retry loop lives above this
/// seam so it can be driven by a scripted executor in tests.
#[async_trait]
pub trait HttpExec: Send + Sync {
    async fn execute(&self, request: &PreparedRequest) -> Result<RawResponse, TransportError>;
}

/// Production executor on `reqwest`, one client per attempt with the
/// connect timeout from the config and the per-attempt total timeout.
#[derive(Debug, Clone)]
pub struct ReqwestExec {
    connect_timeout: Duration,
}

impl ReqwestExec {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl HttpExec for ReqwestExec {
    async fn execute(&self, request: &PreparedRequest) -> Result<RawResponse, TransportError> {
        let started = Instant::now();
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(request.attempt_timeout)
            .build()
            .map_err(|e| TransportError::Network { message: e.to_string() })?;

        let mut builder = client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, started))?;

        let status = response.status().as_u16();
        let content_type = header_string(&response, reqwest::header::CONTENT_TYPE);
        let retry_after = header_string(&response, reqwest::header::RETRY_AFTER);
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, started))?;

        Ok(RawResponse {
            status,
            content_type,
            retry_after,
            body,
        })
    }
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn map_reqwest_error(e: reqwest::Error, started: Instant) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    } else {
        TransportError::Network {
            message: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ResilientTransport
// ---------------------------------------------------------------------------

/// Retrying HTTP transport. Cheap to clone is not a goal; one instance is
/// shared behind the orchestrator.
pub struct ResilientTransport {
    config: ClientConfig,
    exec: Arc<dyn HttpExec>,
    token_provider: Arc<dyn TokenProvider>,
    sink: Arc<dyn LogSink>,
    jitter: Arc<dyn JitterSource>,
    cancel: CancellationToken,
}

impl ResilientTransport {
    pub fn new(config: ClientConfig) -> Self {
        let exec = ReqwestExec::new(config.connect_timeout);
        Self {
            config,
            exec: Arc::new(exec),
            token_provider: Arc::new(NoToken),
            sink: Arc::new(DebugLogSink),
            jitter: Arc::new(RandomJitter::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = provider;
        self
    }

    pub fn with_exec(mut self, exec: Arc<dyn HttpExec>) -> Self {
        self.exec = exec;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Token callers may use to abandon in-flight retry loops. An
    /// already-sent request completes and is discarded.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one logical call against the backend.
    ///
    /// Performs up to `1 + retry.delays.len()` attempts. A `Retry-After`
    /// response header (delta-seconds or HTTP-date) supersedes the
    /// staircase delay for the following attempt; every delay is jittered.
    ///
    /// # Errors
    ///
    /// [`TransportError`] once retries are exhausted or a non-retryable
    /// failure occurs. Body decoding never fails.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<Map<String, Value>, TransportError> {
        let url = self.join_url(path);
        let request_id = Uuid::new_v4().to_string();
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts();
        let mut retry_after_hint: Option<Duration> = None;
        let mut last_err: Option<TransportError> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let base = retry_after_hint
                    .take()
                    .unwrap_or_else(|| policy.delay_for(attempt - 1));
                let delay = self.jitter.apply(base);
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let token = self
                .token_provider
                .token()
                .await
                .filter(|t| !t.trim().is_empty());
            let request = PreparedRequest {
                method: method.clone(),
                url: url.clone(),
                headers: self.layer_headers(headers, token.as_deref(), &request_id),
                body: body.cloned(),
                attempt_timeout: self.config.attempt_timeout,
            };

            let started = Instant::now();
            let outcome = self.exec.execute(&request).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(response) if (200..300).contains(&response.status) => {
                    self.log_attempt(&method, path, &response.status.to_string(), elapsed_ms, &request_id);
                    return Ok(decode_body(response.content_type.as_deref(), &response.body));
                }
                Ok(response) => {
                    self.log_attempt(&method, path, &response.status.to_string(), elapsed_ms, &request_id);
                    let err = http_error(&response, &url);
                    if policy.is_retryable(&err) && attempt + 1 < max_attempts {
                        retry_after_hint =
                            response.retry_after.as_deref().and_then(parse_retry_after);
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(err) => {
                    self.log_attempt(&method, path, &err.to_string(), elapsed_ms, &request_id);
                    if policy.is_retryable(&err) && attempt + 1 < max_attempts {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(last_err.unwrap_or(TransportError::Network {
            message: "no attempt was made".to_string(),
        }))
    }

    /// Probe `GET /health`. Healthy iff 2xx with body `"ok"` or JSON
    /// `{ok:true}` / `{status:"ok"}`. Never errors.
    pub async fn health(&self) -> bool {
        match self.send(Method::GET, "/health", None, &[]).await {
            Ok(map) => {
                if map.get("ok").and_then(Value::as_bool) == Some(true) {
                    return true;
                }
                if map.get("status").and_then(Value::as_str) == Some("ok") {
                    return true;
                }
                ["output_text", "raw"].iter().any(|key| {
                    map.get(*key)
                        .and_then(Value::as_str)
                        .map(str::trim)
                        == Some("ok")
                })
            }
            Err(_) => false,
        }
    }

    fn join_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.config.base_url, path)
        } else {
            format!("{}/{}", self.config.base_url, path)
        }
    }

    /// Header layering, later layers override earlier ones: built-in
    /// defaults < static config headers < per-call headers < bearer token.
    fn layer_headers(
        &self,
        per_call: &[(&str, &str)],
        token: Option<&str>,
        request_id: &str,
    ) -> Vec<(String, String)> {
        let mut layered: HashMap<String, String> = HashMap::new();
        layered.insert("accept".into(), ACCEPT.into());
        layered.insert("accept-encoding".into(), "gzip".into());
        layered.insert(
            "content-type".into(),
            "application/json; charset=utf-8".into(),
        );
        layered.insert("accept-language".into(), self.config.locale.clone());
        layered.insert("x-request-id".into(), request_id.to_string());
        layered.insert("x-request-at".into(), Utc::now().to_rfc3339());

        for (name, value) in &self.config.static_headers {
            layered.insert(name.to_lowercase(), value.clone());
        }
        for (name, value) in per_call {
            layered.insert(name.to_lowercase(), (*value).to_string());
        }
        if let Some(token) = token {
            layered.insert("authorization".into(), format!("Bearer {}", token));
        }

        layered.into_iter().collect()
    }

    fn log_attempt(&self, method: &Method, path: &str, status: &str, elapsed_ms: u64, request_id: &str) {
        let shown: String = path.chars().take(MAX_LOGGED_PATH).collect();
        let line = format!(
            "{} {} -> {} ({} ms) rid={}",
            method, shown, status, elapsed_ms, request_id
        );
        self.sink.log(&redact(&line));
    }
}

// ---------------------------------------------------------------------------
// Decoding helpers
// ---------------------------------------------------------------------------

/// Decode a response body into the uniform map shape.
///
/// JSON content types decode with `{"raw": ...}` fallback; everything else
/// is wrapped as `{"output_text": ...}`.
pub fn decode_body(content_type: Option<&str>, body: &str) -> Map<String, Value> {
    let ct = content_type.unwrap_or("").to_lowercase();
    let mut map = Map::new();
    if ct.contains("json") {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(parsed)) => return parsed,
            Ok(other) => {
                map.insert("raw".to_string(), other);
            }
            Err(_) => {
                map.insert("raw".to_string(), Value::String(body.to_string()));
            }
        }
    } else {
        map.insert("output_text".to_string(), Value::String(body.to_string()));
    }
    map
}

fn http_error(response: &RawResponse, url: &str) -> TransportError {
    let parsed = serde_json::from_str::<Value>(&response.body)
        .unwrap_or_else(|_| Value::String(response.body.clone()));
    let message = parsed
        .get("message")
        .or_else(|| parsed.get("error"))
        .or_else(|| parsed.get("detail"))
        .and_then(Value::as_str)
        .unwrap_or("request failed")
        .to_string();
    TransportError::Http {
        status: response.status,
        message,
        uri: url.to_string(),
        body: parsed,
    }
}

/// Parse a `Retry-After` header value: delta-seconds or HTTP-date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = DateTime::parse_from_rfc2822(trimmed).ok()?;
    let delta = date.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::RetryPolicy;
    use serde_json::json;

    #[tokio::test]
    async fn test_success_first_attempt() {
        let exec = Arc::new(FakeExec::new(vec![FakeExec::json_ok(
            r#"{"output_text":"Wie geht es dir?"}"#,
        )]));
        let transport = transport_with(exec.clone(), RetryPolicy::default());

        let map = transport
            .send(Method::POST, "/reflect_full", Some(&json!({"text":"hi"})), &[])
            .await
            .unwrap();
        assert_eq!(map["output_text"], json!("Wie geht es dir?"));
        assert_eq!(exec.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_and_staircase() {
        let exec = Arc::new(FakeExec::new(vec![
            FakeExec::network_err(),
            FakeExec::network_err(),
            FakeExec::network_err(),
            FakeExec::network_err(),
        ]));
        let transport = transport_with(exec.clone(), RetryPolicy::default());

        let result = transport.send(Method::POST, "/reflect", None, &[]).await;
        assert!(matches!(result, Err(TransportError::Network { .. })));

        let times = exec.call_times.lock().unwrap();
        assert_eq!(times.len(), 4, "N delays allow N+1 attempts");
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps[0], Duration::from_millis(420));
        assert_eq!(gaps[1], Duration::from_millis(900));
        assert_eq!(gaps[2], Duration::from_millis(1800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_supersedes_staircase() {
        let exec = Arc::new(FakeExec::new(vec![
            FakeExec::status(429, Some("2")),
            FakeExec::json_ok(r#"{"output_text":"ok"}"#),
        ]));
        let transport = transport_with(exec.clone(), RetryPolicy::default());

        let map = transport
            .send(Method::POST, "/reflect", None, &[])
            .await
            .unwrap();
        assert_eq!(map["output_text"], json!("ok"));

        let times = exec.call_times.lock().unwrap();
        assert_eq!(times.len(), 2, "exactly one retry");
        assert_eq!(times[1] - times[0], Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_client_error_fails_immediately() {
        let exec = Arc::new(FakeExec::new(vec![Ok(RawResponse {
            status: 400,
            content_type: Some("application/json".into()),
            retry_after: None,
            body: r#"{"message":"bad request"}"#.into(),
        })]));
        let transport = transport_with(exec.clone(), RetryPolicy::default());

        let err = transport
            .send(Method::POST, "/reflect", None, &[])
            .await
            .unwrap_err();
        match err {
            TransportError::Http { status, message, uri, body } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad request");
                assert!(uri.ends_with("/reflect"));
                assert_eq!(body["message"], json!("bad request"));
            }
            other => panic!("expected Http error, got {other:?}"),
        }
        assert_eq!(exec.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_text_plain_wrapped_as_output_text() {
        let exec = Arc::new(FakeExec::new(vec![Ok(RawResponse {
            status: 200,
            content_type: Some("text/plain; charset=utf-8".into()),
            retry_after: None,
            body: "ok".into(),
        })]));
        let transport = transport_with(exec, RetryPolicy::none());

        let map = transport.send(Method::GET, "/health", None, &[]).await.unwrap();
        assert_eq!(map["output_text"], json!("ok"));
    }

    #[tokio::test]
    async fn test_broken_json_falls_back_to_raw() {
        let exec = Arc::new(FakeExec::new(vec![Ok(RawResponse {
            status: 200,
            content_type: Some("application/json".into()),
            retry_after: None,
            body: "{not json".into(),
        })]));
        let transport = transport_with(exec, RetryPolicy::none());

        let map = transport.send(Method::POST, "/reflect", None, &[]).await.unwrap();
        assert_eq!(map["raw"], json!("{not json"));
    }

    #[tokio::test]
    async fn test_header_layering() {
        let exec = Arc::new(FakeExec::new(vec![FakeExec::json_ok("{}")]));
        let config = ClientConfig::new("https://backend.test")
            .with_locale("de-AT")
            .with_header("X-App-Version", "9.9.9");
        let transport = ResilientTransport::new(config)
            .with_exec(exec.clone())
            .with_jitter(Arc::new(NoJitter))
            .with_token_provider(Arc::new(StaticToken("secret-token".into())));

        transport
            .send(Method::POST, "/reflect", None, &[("Accept", "application/json")])
            .await
            .unwrap();

        let requests = exec.requests.lock().unwrap();
        let headers: HashMap<_, _> = requests[0].headers.iter().cloned().collect();
        assert_eq!(headers["authorization"], "Bearer secret-token");
        assert_eq!(headers["accept"], "application/json");
        assert_eq!(headers["accept-language"], "de-AT");
        assert_eq!(headers["x-app-version"], "9.9.9");
        assert_eq!(headers["content-type"], "application/json; charset=utf-8");
        assert!(headers.contains_key("x-request-id"));
        assert!(headers.contains_key("x-request-at"));
    }

    #[tokio::test]
    async fn test_empty_token_omits_authorization() {
        let exec = Arc::new(FakeExec::new(vec![FakeExec::json_ok("{}")]));
        let transport = transport_with(exec.clone(), RetryPolicy::none())
            .with_token_provider(Arc::new(StaticToken("  ".into())));

        transport.send(Method::POST, "/reflect", None, &[]).await.unwrap();
        let requests = exec.requests.lock().unwrap();
        assert!(!requests[0].headers.iter().any(|(k, _)| k == "authorization"));
    }

    #[tokio::test]
    async fn test_cancelled_before_attempt() {
        let exec = Arc::new(FakeExec::new(vec![FakeExec::json_ok("{}")]));
        let transport = transport_with(exec.clone(), RetryPolicy::default());
        transport.cancellation_token().cancel();

        let err = transport.send(Method::POST, "/reflect", None, &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert!(exec.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_variants() {
        for (body, content_type, healthy) in [
            ("ok", "text/plain", true),
            (r#"{"ok":true}"#, "application/json", true),
            (r#"{"status":"ok"}"#, "application/json", true),
            (r#"{"status":"degraded"}"#, "application/json", false),
        ] {
            let exec = Arc::new(FakeExec::new(vec![Ok(RawResponse {
                status: 200,
                content_type: Some(content_type.into()),
                retry_after: None,
                body: body.into(),
            })]));
            let transport = transport_with(exec, RetryPolicy::none());
            assert_eq!(transport.health().await, healthy, "body: {body}");
        }

        let failing = Arc::new(FakeExec::new(vec![FakeExec::network_err()]));
        let transport = transport_with(failing, RetryPolicy::none());
        assert!(!transport.health().await);
    }

    #[tokio::test]
    async fn test_log_lines_are_redacted() {
        let exec = Arc::new(FakeExec::new(vec![FakeExec::json_ok("{}")]));
        let sink = Arc::new(RecordingSink::default());
        let transport = transport_with(exec, RetryPolicy::none()).with_sink(sink.clone());

        transport
            .send(Method::POST, "/reflect?user=max@example.org", None, &[])
            .await
            .unwrap();

        let lines = sink.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("POST"));
        assert!(lines[0].contains("rid="));
        assert!(!lines[0].contains("max@example.org"));
    }

    #[test]
    fn test_parse_retry_after_seconds_and_date() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 10 "), Some(Duration::from_secs(10)));
        assert_eq!(parse_retry_after("soon"), None);
        // A date in the past clamps to zero rather than failing.
        let past = parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(past, Some(Duration::ZERO));
    }

    #[test]
    fn test_jitter_envelope() {
        let jitter = RandomJitter::default();
        for _ in 0..64 {
            let d = jitter.apply(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1200));
        }
    }
}
