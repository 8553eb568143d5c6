//! Conversation entities: sessions, threads and turns.

use super::provider_context::ProviderContexts;
use super::response::ResponseType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Id of the thread every session starts with.
pub const DEFAULT_THREAD_ID: &str = "default-thread";

/// Sequence number reserved for off-timeline (recompute) AI turns.
pub const BRANCH_SEQUENCE: i64 = -1;

/// A conversation (Entity)
///
/// `last_turn_id` always points at the newest mainline AI turn. Recompute
/// branches never move it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub turn_count: u32,
    pub last_turn_id: Option<String>,
}

impl Session {
    /// Sequence the next user turn will get.
    pub fn next_sequence(&self) -> i64 {
        i64::from(self.turn_count)
    }
}

/// A line of conversation within a session (Entity)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub session_id: String,
    pub title: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A user contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTurn {
    pub id: String,
    pub session_id: String,
    pub thread_id: String,
    pub content: String,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

/// Extra markers on an AI turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiTurnMeta {
    /// Set on turns derived by recompute; they live off the timeline.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_historical_rerun: bool,
    /// The mainline turn a recompute was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_turn_id: Option<String>,
    /// Which step a recompute re-derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recomputed_step: Option<ResponseType>,
}

/// An AI contribution, answering one user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiTurn {
    pub id: String,
    pub user_turn_id: String,
    pub session_id: String,
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub provider_contexts: ProviderContexts,
    pub sequence: i64,
    pub batch_response_count: u32,
    pub mapping_response_count: u32,
    pub synthesis_response_count: u32,
    #[serde(default)]
    pub meta: AiTurnMeta,
}

impl AiTurn {
    /// Whether this turn is an off-timeline recompute branch.
    pub fn is_branch(&self) -> bool {
        self.sequence == BRANCH_SEQUENCE
    }
}

/// A user or AI turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    User(UserTurn),
    Ai(AiTurn),
}

impl Turn {
    pub fn id(&self) -> &str {
        match self {
            Turn::User(t) => &t.id,
            Turn::Ai(t) => &t.id,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Turn::User(t) => &t.session_id,
            Turn::Ai(t) => &t.session_id,
        }
    }

    pub fn sequence(&self) -> i64 {
        match self {
            Turn::User(t) => t.sequence,
            Turn::Ai(t) => t.sequence,
        }
    }

    pub fn as_ai(&self) -> Option<&AiTurn> {
        match self {
            Turn::Ai(t) => Some(t),
            Turn::User(_) => None,
        }
    }

    pub fn into_ai(self) -> Option<AiTurn> {
        match self {
            Turn::Ai(t) => Some(t),
            Turn::User(_) => None,
        }
    }

    pub fn as_user(&self) -> Option<&UserTurn> {
        match self {
            Turn::User(t) => Some(t),
            Turn::Ai(_) => None,
        }
    }
}
