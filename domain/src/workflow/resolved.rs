//! Resolved context: the minimal state a request needs downstream.

use super::request::RecomputeStep;
use crate::conversation::provider_context::ProviderContexts;
use crate::conversation::response::ResponseStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One provider's batch answer, frozen from a past turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenOutput {
    pub provider_id: String,
    pub text: String,
    pub status: ResponseStatus,
    #[serde(default)]
    pub meta: Value,
    pub updated_at: DateTime<Utc>,
}

/// Context for continuing the mainline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendContext {
    pub session_id: String,
    pub last_turn_id: String,
    pub provider_contexts: ProviderContexts,
}

/// Context for re-deriving a step of a past turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecomputeContext {
    pub session_id: String,
    pub source_turn_id: String,
    pub source_user_turn_id: String,
    pub frozen_batch_outputs: BTreeMap<String, FrozenOutput>,
    pub provider_contexts_at_source_turn: ProviderContexts,
    pub step_type: RecomputeStep,
    pub target_provider: String,
    pub source_user_message: String,
}

/// Output of context resolution, one variant per primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolvedContext {
    Initialize { providers: Vec<String> },
    Extend(ExtendContext),
    Recompute(RecomputeContext),
}

impl ResolvedContext {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolvedContext::Initialize { .. } => "initialize",
            ResolvedContext::Extend(_) => "extend",
            ResolvedContext::Recompute(_) => "recompute",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            ResolvedContext::Initialize { .. } => None,
            ResolvedContext::Extend(c) => Some(&c.session_id),
            ResolvedContext::Recompute(c) => Some(&c.session_id),
        }
    }

    pub fn as_recompute(&self) -> Option<&RecomputeContext> {
        match self {
            ResolvedContext::Recompute(c) => Some(c),
            _ => None,
        }
    }
}
