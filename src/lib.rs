//! # reflect-client
//!
//! Client engine for multi-turn, AI-guided reflection conversations
//! against a remote inference backend over an unreliable HTTP transport.
//!
//! Three layers compose, leaves first: a pure text sanitizer, a resilient
//! retrying transport (backoff + jitter, `Retry-After` compliance, content
//! negotiation), and a tolerant normalizer that converts drifted JSON
//! payloads into one canonical [`Turn`](protocol::Turn) record. The
//! [`ReflectionOrchestrator`](orchestrator::ReflectionOrchestrator) façade
//! sequences them and gates what a conversational UI may show (question
//! vs. mood check-in vs. closure vs. talk-only filler).
//!
//! Journal and mood data models, persistence, theming and rendering are
//! external collaborators — they only consume [`Turn`](protocol::Turn)
//! values after the orchestrator returns.

pub mod config;
pub mod error;
pub mod i18n;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod text;
pub mod transport;

pub use config::{ClientConfig, RetryPolicy};
pub use error::TransportError;
pub use orchestrator::ReflectionOrchestrator;
pub use protocol::risk::{RiskFlag, WireRisk};
pub use protocol::{Flow, Normalizer, Turn};
pub use session::{Session, SessionPhase};
pub use transport::{
    HttpExec, JitterSource, LogSink, Method, NoJitter, NoToken, PreparedRequest, RandomJitter,
    RawResponse, ResilientTransport, StaticToken, TokenProvider,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
