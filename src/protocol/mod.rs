//! Canonical turn records and the tolerant response normalizer.
//!
//! The backend's JSON shape has drifted across versions and uses
//! inconsistent field aliases. This module converts whatever arrives into
//! one closed [`Turn`] record via explicit, ordered alias tables — one
//! auditable `(key, coercion)` list per field instead of cascading
//! conditionals. Parsing is total: no input map makes it fail.

pub mod risk;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::i18n;
use crate::session::{clamp_turns, Session};
use crate::text::{
    dedupe_preserve_order, normalize_whitespace, normalized_key, sanitize_question,
    DEFAULT_WORD_LIMIT, MAX_ANSWER_HELPERS, MAX_CONTEXT_ITEMS, MAX_FOLLOWUPS, MAX_TALK_LINES,
};
use self::risk::RiskFlag;

// ---------------------------------------------------------------------------
// Alias tables
// ---------------------------------------------------------------------------

/// One step in the primary-text precedence order.
#[derive(Debug, Clone, Copy)]
enum TextSource {
    Key(&'static str),
    /// `choices[0].message.content` / `.text` (chat-completions drift).
    Choices,
}

/// Ordered precedence for the displayed primary text; first non-empty wins.
/// The order is backend-version lore — do not reshuffle.
const PRIMARY_TEXT_SOURCES: &[TextSource] = &[
    TextSource::Key("primary"),
    TextSource::Key("primary_question"),
    TextSource::Key("lead"),
    TextSource::Key("lead_question"),
    TextSource::Key("output_text"),
    TextSource::Key("question"),
    TextSource::Choices,
    TextSource::Key("content"),
    TextSource::Key("raw"),
];

const QUESTION_KEYS: &[&str] = &["questions", "multi_questions", "qs"];
const ALTERNATE_KEYS: &[&str] = &["alt", "alternatives", "options", "variants"];
const MIRROR_KEYS: &[&str] = &["mirror", "empathy"];
const CONTEXT_KEYS: &[&str] = &["context", "themes", "topics"];
const TALK_KEYS: &[&str] = &["talk", "talk_lines", "smalltalk"];
const FOLLOWUP_KEYS: &[&str] = &["followups", "follow_ups", "next_questions"];
const HELPER_KEYS: &[&str] = &["answer_helpers", "helpers"];
const SCHOOL_KEYS: &[&str] = &["school", "schools", "approach", "method"];
const RISK_KEYS: &[&str] = &["risk_level", "risk_flag", "risk"];

// Flow aliases, canonical name first. The canonical name is also accepted
// at the payload root for older backends that flattened the flow object.
const RECOMMEND_END_KEYS: &[&str] = &["recommend_end", "end"];
const SUGGEST_BREAK_KEYS: &[&str] = &["suggest_break", "break"];
const TALK_ONLY_KEYS: &[&str] = &["talk_only"];
const ALLOW_REFLECT_KEYS: &[&str] = &["allow_reflect"];
const MOOD_PROMPT_KEYS: &[&str] = &["mood_prompt"];

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Backend steering signals for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub recommend_end: bool,
    pub suggest_break: bool,
    pub risk_notice: Option<String>,
    pub session_turn: Option<u32>,
    pub talk_only: bool,
    /// Defaults to true unless the backend says otherwise explicitly.
    pub allow_reflect: bool,
    pub mood_prompt: bool,
}

impl Default for Flow {
    fn default() -> Self {
        Self {
            recommend_end: false,
            suggest_break: false,
            risk_notice: None,
            session_turn: None,
            talk_only: false,
            allow_reflect: true,
            mood_prompt: false,
        }
    }
}

/// Immutable result of one reflect round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Never empty; falls back to the localized error sentinel.
    pub output_text: String,
    pub mirror: Option<String>,
    pub context: Vec<String>,
    pub followups: Vec<String>,
    pub answer_helpers: Vec<String>,
    pub flow: Flow,
    pub session: Session,
    pub tags: Vec<String>,
    pub risk_flag: RiskFlag,
    pub questions: Vec<String>,
    pub talk: Vec<String>,
}

impl Turn {
    /// Gating rule: the primary question is visible only while no mood
    /// check-in, end recommendation or talk-only mode is in effect.
    pub fn visible_question(&self) -> Option<&str> {
        if self.flow.mood_prompt || self.flow.recommend_end || self.flow.talk_only {
            None
        } else {
            Some(&self.output_text)
        }
    }

    /// Wire-level risk vocabulary (`none`/`mild`/`high`).
    pub fn wire_risk_level(&self) -> &'static str {
        self.risk_flag.wire_level().as_str()
    }

    /// Wire-level `risk` boolean.
    pub fn wire_risk(&self) -> bool {
        self.risk_flag.is_elevated()
    }

    /// Canned local turn substituted when the backend is unreachable.
    /// Risk is forced to none: a transport failure must never be read as
    /// a crisis signal.
    pub fn fallback(session: Session, locale: &str) -> Self {
        Self {
            output_text: i18n::error_sentinel(locale).to_string(),
            mirror: None,
            context: Vec::new(),
            followups: Vec::new(),
            answer_helpers: Vec::new(),
            flow: Flow::default(),
            session,
            tags: Vec::new(),
            risk_flag: RiskFlag::None,
            questions: Vec::new(),
            talk: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Converts heterogeneous backend payloads into canonical [`Turn`]s.
/// Holds no conversation state.
#[derive(Debug, Clone)]
pub struct Normalizer {
    locale: String,
    word_limit: usize,
}

impl Normalizer {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            word_limit: DEFAULT_WORD_LIMIT,
        }
    }

    /// Parse one response payload. Total: any JSON map yields a valid Turn.
    pub fn parse_turn(&self, raw: &Map<String, Value>, session: &Session) -> Turn {
        // Degenerate payloads ({output_text} / {raw} / {}) skip the full
        // alias machinery.
        if raw.keys().all(|k| k == "output_text" || k == "raw") {
            return self.degenerate_turn(raw, session);
        }

        let primary = primary_text(raw)
            .map(|s| sanitize_question(&s, self.word_limit))
            .filter(|s| !s.is_empty());

        let mut questions: Vec<String> = Vec::new();
        for key in QUESTION_KEYS.iter().chain(ALTERNATE_KEYS) {
            if let Some(value) = raw.get(*key) {
                questions.extend(
                    string_list(value)
                        .iter()
                        .map(|q| sanitize_question(q, self.word_limit))
                        .filter(|q| !q.is_empty()),
                );
            }
        }
        let questions = dedupe_preserve_order(&questions);

        let output_text = match &primary {
            Some(text) => text.clone(),
            None => match questions.len() {
                0 => i18n::error_sentinel(&self.locale).to_string(),
                1 => questions[0].clone(),
                _ => questions
                    .iter()
                    .map(|q| format!("– {}", q))
                    .collect::<Vec<_>>()
                    .join("\n"),
            },
        };

        let primary_key = primary
            .as_deref()
            .or(questions.first().map(String::as_str))
            .map(normalized_key)
            .unwrap_or_default();

        let mirror = first_string(raw, MIRROR_KEYS)
            .map(|s| normalize_whitespace(&s))
            .filter(|s| !s.is_empty());

        let mut context = dedupe_preserve_order(&first_list(raw, CONTEXT_KEYS));
        context.truncate(MAX_CONTEXT_ITEMS);

        let mut talk = dedupe_preserve_order(&first_list(raw, TALK_KEYS));
        talk.truncate(MAX_TALK_LINES);

        let mut followups: Vec<String> = dedupe_preserve_order(&first_list(raw, FOLLOWUP_KEYS));
        followups.retain(|f| normalized_key(f) != primary_key);
        followups.truncate(MAX_FOLLOWUPS);

        let mut helpers: Vec<String> = Vec::new();
        for key in HELPER_KEYS {
            if let Some(value) = raw.get(*key) {
                helpers.extend(string_list(value));
            }
        }
        helpers.extend(nested_list(raw, "flow", "answer_helpers"));
        helpers.extend(nested_list(raw, "ui", "chips"));
        let mut helpers: Vec<String> = dedupe_preserve_order(&helpers)
            .into_iter()
            // Never offer a question as an answer scaffold.
            .filter(|h| !h.ends_with('?'))
            .map(|h| h.trim_end_matches(':').trim_end().to_string())
            .filter(|h| !h.is_empty() && normalized_key(h) != primary_key)
            .collect();
        helpers.truncate(MAX_ANSWER_HELPERS);

        let mut tags: Vec<String> = first_list(raw, SCHOOL_KEYS)
            .iter()
            .map(|s| risk::canonical_school(s))
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(worker) = raw.get("tags") {
            tags.extend(string_list(worker));
        }
        let tags = dedupe_preserve_order(&tags);

        Turn {
            output_text,
            mirror,
            context,
            followups,
            answer_helpers: helpers,
            flow: parse_flow(raw),
            session: merge_session(raw, session),
            tags,
            risk_flag: parse_risk(raw),
            questions,
            talk,
        }
    }

    fn degenerate_turn(&self, raw: &Map<String, Value>, session: &Session) -> Turn {
        let text = ["output_text", "raw"]
            .iter()
            .find_map(|key| display_string(raw.get(*key)))
            .map(|s| normalize_whitespace(&s))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| i18n::error_sentinel(&self.locale).to_string());
        Turn {
            output_text: text,
            ..Turn::fallback(session.clone(), &self.locale)
        }
    }
}

// ---------------------------------------------------------------------------
// Field coercions
// ---------------------------------------------------------------------------

fn primary_text(raw: &Map<String, Value>) -> Option<String> {
    for source in PRIMARY_TEXT_SOURCES {
        let candidate = match source {
            TextSource::Key(key) => non_empty_string(raw.get(*key)),
            TextSource::Choices => choices_text(raw),
        };
        if candidate.is_some() {
            return candidate;
        }
    }
    None
}

fn choices_text(raw: &Map<String, Value>) -> Option<String> {
    let first = raw.get("choices")?.as_array()?.first()?;
    let message = first.get("message");
    non_empty_string(message.and_then(|m| m.get("content")))
        .or_else(|| non_empty_string(message.and_then(|m| m.get("text"))))
        .or_else(|| non_empty_string(first.get("text")))
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Like [`non_empty_string`] but tolerates scalar drift (numbers, bools).
fn display_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Coerce one value into a trimmed string list. A bare string becomes a
/// one-element list; anything non-listy is empty.
fn string_list(value: &Value) -> Vec<String> {
    let items: Vec<String> = match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(values) => values
            .iter()
            .filter_map(|v| display_string(Some(v)))
            .collect(),
        _ => Vec::new(),
    };
    items
        .iter()
        .map(|s| normalize_whitespace(s))
        .filter(|s| !s.is_empty())
        .collect()
}

/// First alias key that yields a non-empty list wins.
fn first_list(raw: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    for key in keys {
        if let Some(value) = raw.get(*key) {
            let list = string_list(value);
            if !list.is_empty() {
                return list;
            }
        }
    }
    Vec::new()
}

fn first_string(raw: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| non_empty_string(raw.get(*key)))
}

fn nested_list(raw: &Map<String, Value>, outer: &str, inner: &str) -> Vec<String> {
    raw.get(outer)
        .and_then(Value::as_object)
        .and_then(|m| m.get(inner))
        .map(string_list)
        .unwrap_or_default()
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

/// Find a flow field: all aliases inside the `flow` object, then the
/// canonical name (first alias) at the payload root for flattened legacy
/// payloads.
fn flow_lookup<'a>(raw: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    if let Some(flow) = raw.get("flow").and_then(Value::as_object) {
        for key in keys {
            if let Some(value) = flow.get(*key) {
                return Some(value);
            }
        }
    }
    raw.get(keys[0])
}

fn flow_flag(raw: &Map<String, Value>, keys: &[&str], default: bool) -> bool {
    flow_lookup(raw, keys).and_then(coerce_bool).unwrap_or(default)
}

fn parse_flow(raw: &Map<String, Value>) -> Flow {
    Flow {
        recommend_end: flow_flag(raw, RECOMMEND_END_KEYS, false),
        suggest_break: flow_flag(raw, SUGGEST_BREAK_KEYS, false),
        risk_notice: flow_lookup(raw, &["risk_notice"])
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
        session_turn: flow_lookup(raw, &["session_turn"])
            .and_then(Value::as_u64)
            .map(|n| n as u32),
        talk_only: flow_flag(raw, TALK_ONLY_KEYS, false),
        allow_reflect: flow_flag(raw, ALLOW_REFLECT_KEYS, true),
        mood_prompt: flow_flag(raw, MOOD_PROMPT_KEYS, false),
    }
}

/// Backend-echoed session fields override local tracking when well-typed.
fn merge_session(raw: &Map<String, Value>, local: &Session) -> Session {
    let mut merged = local.clone();
    if let Some(echoed) = raw.get("session").and_then(Value::as_object) {
        if let Some(id) = non_empty_string(echoed.get("id")) {
            merged.thread_id = id;
        }
        if let Some(turn) = echoed.get("turn").and_then(Value::as_u64) {
            merged.turn_index = turn as u32;
        }
        if let Some(max) = echoed.get("max_turns").and_then(Value::as_u64) {
            merged.max_turns = clamp_turns(max as u32);
        }
    }
    merged
}

fn parse_risk(raw: &Map<String, Value>) -> RiskFlag {
    for key in RISK_KEYS {
        match raw.get(*key) {
            Some(Value::String(s)) => return RiskFlag::from_wire_str(s),
            Some(Value::Bool(true)) => return RiskFlag::Support,
            Some(Value::Bool(false)) => return RiskFlag::None,
            _ => continue,
        }
    }
    RiskFlag::None
}
