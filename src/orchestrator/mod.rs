//! Reflection orchestrator: the façade that sequences transport →
//! normalizer → session update.
//!
//! All conversational operations are non-throwing: every transport
//! failure is converted into a valid local [`Turn`] (or, for closure, the
//! safe closure default) so nothing below this boundary ever reaches the
//! caller as an error. One orchestrator drives one conversation at a
//! time; distinct sessions get distinct orchestrator instances.

use serde_json::{json, Map, Value};

use crate::error::TransportError;
use crate::i18n;
use crate::protocol::{Flow, Normalizer, Turn};
use crate::session::{clamp_turns, Session, SessionPhase, DEFAULT_TURNS};
use crate::transport::{Method, ResilientTransport};

/// Orchestrates one multi-turn reflection conversation.
pub struct ReflectionOrchestrator {
    transport: ResilientTransport,
    normalizer: Normalizer,
    locale: String,
    session: Option<Session>,
    phase: SessionPhase,
    default_max_turns: u32,
}

impl ReflectionOrchestrator {
    pub fn new(transport: ResilientTransport) -> Self {
        let locale = transport.config().locale.clone();
        Self {
            normalizer: Normalizer::new(locale.clone()),
            locale,
            transport,
            session: None,
            phase: SessionPhase::Idle,
            default_max_turns: DEFAULT_TURNS,
        }
    }

    /// Turn budget for sessions started by this orchestrator, clamped.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.default_max_turns = clamp_turns(max_turns);
        self
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    // -----------------------------------------------------------------
    // Conversational operations
    // -----------------------------------------------------------------

    /// Begin a fresh conversation. Supersedes any previous session.
    pub async fn start(&mut self, text: &str) -> Turn {
        let candidate = Session::start(Some(self.default_max_turns));
        self.run_turn("/reflect_full", candidate, text, None).await
    }

    /// Next guided turn on the current thread.
    pub async fn continue_turn(&mut self, text: &str) -> Turn {
        let candidate = self.next_candidate();
        self.run_turn("/next_turn_full", candidate, text, None).await
    }

    /// Talk-only turn: supportive filler instead of a guiding question.
    /// The returned turn always carries `flow.talk_only`, whatever the
    /// payload said.
    pub async fn talk(&mut self, text: &str) -> Turn {
        let candidate = self.next_candidate();
        self.run_turn("/next_turn_full", candidate, text, Some("talk"))
            .await
    }

    /// Terminal closure call. Never fails: a transport error yields the
    /// safe local closure default so the user can always finish.
    pub async fn closure(&mut self, answer: &str) -> Map<String, Value> {
        let session = self
            .session
            .clone()
            .unwrap_or_else(|| Session::start(Some(self.default_max_turns)));
        let body = json!({
            "answer": answer,
            "text": answer,
            "locale": self.transport.config().locale,
            "tz": self.transport.config().timezone,
            "session": session.as_payload(),
        });

        self.phase = SessionPhase::Closure;
        let result = self
            .transport
            .send(Method::POST, "/closure_full", Some(&body), &[])
            .await;
        self.phase = SessionPhase::Ended;
        match result {
            Ok(map) => map,
            Err(err) => {
                log::warn!("closure fell back to local default: {}", err);
                local_closure_default()
            }
        }
    }

    /// Clear local bookkeeping. No network call.
    pub fn end_session(&mut self) {
        self.session = None;
        self.phase = SessionPhase::Ended;
    }

    /// Backend health probe; false on any failure.
    pub async fn health(&self) -> bool {
        self.transport.health().await
    }

    /// What the conversational surface should render for a turn: the
    /// gated primary question, or the localized mood check-in.
    pub fn display_text<'a>(&self, turn: &'a Turn) -> &'a str {
        turn.visible_question()
            .unwrap_or_else(|| i18n::mood_checkin(&self.locale))
    }

    // -----------------------------------------------------------------
    // Auxiliary endpoints — same transport, no turn contract
    // -----------------------------------------------------------------

    pub async fn story(&self, payload: &Value) -> Result<Map<String, Value>, TransportError> {
        self.transport.send(Method::POST, "/story", Some(payload), &[]).await
    }

    pub async fn mood(&self, payload: &Value) -> Result<Map<String, Value>, TransportError> {
        self.transport.send(Method::POST, "/mood", Some(payload), &[]).await
    }

    pub async fn journey(&self, payload: &Value) -> Result<Map<String, Value>, TransportError> {
        self.transport.send(Method::POST, "/journey", Some(payload), &[]).await
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn next_candidate(&self) -> Session {
        match &self.session {
            Some(session) => session.advanced(),
            None => Session::start(Some(self.default_max_turns)),
        }
    }

    async fn run_turn(
        &mut self,
        path: &str,
        candidate: Session,
        text: &str,
        intent: Option<&str>,
    ) -> Turn {
        let body = self.turn_request(text, &candidate, intent);
        match self.transport.send(Method::POST, path, Some(&body), &[]).await {
            Ok(map) => {
                let mut turn = self.normalizer.parse_turn(&map, &candidate);
                if intent == Some("talk") {
                    turn.flow.talk_only = true;
                }
                // Local bookkeeping advances only on success.
                self.session = Some(turn.session.clone());
                self.phase = phase_for(&turn.flow);
                turn
            }
            Err(err) => {
                log::warn!("reflection turn failed: {}", err);
                // Session stays put so the caller may retry the same turn.
                let session = self.session.clone().unwrap_or(candidate);
                Turn::fallback(session, &self.locale)
            }
        }
    }

    fn turn_request(&self, text: &str, session: &Session, intent: Option<&str>) -> Value {
        let mut body = json!({
            "text": text,
            "messages": [{"role": "user", "content": text}],
            "locale": self.transport.config().locale,
            "tz": self.transport.config().timezone,
            "session": session.as_payload(),
        });
        if let Some(intent) = intent {
            body["intent"] = json!(intent);
        }
        body
    }
}

fn phase_for(flow: &Flow) -> SessionPhase {
    if flow.recommend_end {
        SessionPhase::RecommendEnd
    } else if flow.talk_only {
        SessionPhase::TalkOnly
    } else {
        SessionPhase::Active
    }
}

/// Safe closure payload used when the backend is unreachable.
fn local_closure_default() -> Map<String, Value> {
    json!({
        "closure": {"mood_intro": {"text": ""}},
        "flow": {"recommend_end": true, "mood_prompt": true},
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}
