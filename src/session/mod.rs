//! Conversation session bookkeeping.
//!
//! A `Session` identifies one logical multi-turn thread. It is owned
//! exclusively by the orchestrator, mutated only by advancing the turn
//! index on success, and superseded (never deleted) by a fresh session
//! with a new thread id.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Bounds for the number of guided turns in one session.
pub const MIN_TURNS: u32 = 2;
pub const MAX_TURNS: u32 = 6;
pub const DEFAULT_TURNS: u32 = 3;

/// One logical reflection thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque thread id, allocated client-side and echoed by the backend.
    pub thread_id: String,
    /// Zero-based index of the current turn.
    pub turn_index: u32,
    /// Clamped to [`MIN_TURNS`]..=[`MAX_TURNS`].
    pub max_turns: u32,
}

impl Session {
    /// Start a fresh session with a new opaque thread id.
    pub fn start(max_turns: Option<u32>) -> Self {
        Self {
            thread_id: Uuid::new_v4().to_string(),
            turn_index: 0,
            max_turns: clamp_turns(max_turns.unwrap_or(DEFAULT_TURNS)),
        }
    }

    /// The same thread, advanced by one turn.
    pub fn advanced(&self) -> Self {
        Self {
            thread_id: self.thread_id.clone(),
            turn_index: self.turn_index.saturating_add(1),
            max_turns: self.max_turns,
        }
    }

    /// Whether the current turn is the last guided one.
    pub fn is_final_turn(&self) -> bool {
        self.turn_index + 1 >= self.max_turns
    }

    /// Wire shape: `{id, turn, max_turns}`.
    pub fn as_payload(&self) -> Value {
        json!({
            "id": self.thread_id,
            "turn": self.turn_index,
            "max_turns": self.max_turns,
        })
    }
}

/// Clamp a requested turn budget into the allowed range.
pub fn clamp_turns(requested: u32) -> u32 {
    requested.clamp(MIN_TURNS, MAX_TURNS)
}

/// Coarse lifecycle phase of a conversation, derived from the last turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Active,
    TalkOnly,
    RecommendEnd,
    Closure,
    Ended,
}
