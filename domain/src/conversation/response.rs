//! Provider response records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which step of a turn produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Direct answer of a provider to the user's prompt.
    Batch,
    /// Narrative map of agreements and tensions across batch answers.
    Mapping,
    /// Merged answer built from batch answers (and optionally a mapping).
    Synthesis,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Batch => "batch",
            ResponseType::Mapping => "mapping",
            ResponseType::Synthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for ResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a response: `pending → streaming → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Pending,
    Streaming,
    Completed,
    Failed,
}

impl ResponseStatus {
    /// Preference when several rows exist for the same provider:
    /// completed beats streaming beats pending. Failed rows rank last.
    pub fn preference(&self) -> u8 {
        match self {
            ResponseStatus::Completed => 3,
            ResponseStatus::Streaming => 2,
            ResponseStatus::Pending => 1,
            ResponseStatus::Failed => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResponseStatus::Completed | ResponseStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Pending => "pending",
            ResponseStatus::Streaming => "streaming",
            ResponseStatus::Completed => "completed",
            ResponseStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One provider's output for one step of an AI turn (Entity)
///
/// `(session_id, ai_turn_id, provider_id, response_type, response_index)` is
/// unique. The id is derived from that key, so writing the same key twice
/// replaces the record instead of adding a second one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub id: String,
    pub session_id: String,
    pub ai_turn_id: String,
    pub provider_id: String,
    pub response_type: ResponseType,
    pub response_index: u32,
    pub text: String,
    pub status: ResponseStatus,
    #[serde(default)]
    pub meta: Value,
    /// Hard error, or the soft-error marker of salvaged text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderResponse {
    /// Compose the record id from its unique key.
    pub fn key_id(
        ai_turn_id: &str,
        provider_id: &str,
        response_type: ResponseType,
        response_index: u32,
    ) -> String {
        format!(
            "{}:{}:{}:{}",
            ai_turn_id, provider_id, response_type, response_index
        )
    }

    /// Whether this row carries text usable as a step input.
    pub fn is_usable(&self) -> bool {
        self.status != ResponseStatus::Failed && !self.text.trim().is_empty()
    }
}
