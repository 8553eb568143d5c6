//! Workflow requests: the three primitives.
//!
//! - **initialize** starts a conversation
//! - **extend** continues the mainline of an existing conversation
//! - **recompute** re-derives one mapping or synthesis from a past turn,
//!   off the timeline

use crate::conversation::response::ResponseType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Options shared by initialize and extend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnOptions {
    /// Providers asked to answer the prompt directly.
    pub providers: Vec<String>,
    /// Whether to run a mapping step over the batch answers.
    pub include_mapping: bool,
    /// Provider writing the mapping (defaults to the synthesizer, then the
    /// first provider).
    pub mapper: Option<String>,
    /// Provider writing the synthesis; `None` means no synthesis step.
    pub synthesizer: Option<String>,
    pub use_thinking: bool,
    /// Opaque per-provider metadata forwarded to the orchestrator.
    pub provider_meta: BTreeMap<String, Value>,
    /// Hide batch answers from the caller until the synthesis is ready.
    pub synthesis_first: bool,
}

impl TurnOptions {
    pub fn new(providers: Vec<String>) -> Self {
        Self {
            providers,
            ..Default::default()
        }
    }

    /// The provider that will write the mapping, if mapping is requested.
    pub fn effective_mapper(&self) -> Option<&str> {
        if !self.include_mapping {
            return None;
        }
        self.mapper
            .as_deref()
            .or(self.synthesizer.as_deref())
            .or(self.providers.first().map(String::as_str))
    }

    /// Whether anything at all would run.
    pub fn has_work(&self) -> bool {
        !self.providers.is_empty() || self.synthesizer.is_some() || self.effective_mapper().is_some()
    }
}

/// Start a new conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub user_message: String,
    #[serde(flatten)]
    pub options: TurnOptions,
}

/// Continue an existing conversation on its mainline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendRequest {
    pub session_id: String,
    pub user_message: String,
    #[serde(flatten)]
    pub options: TurnOptions,
    /// Providers that start a fresh exchange instead of continuing.
    #[serde(default)]
    pub reset_providers: Vec<String>,
}

/// The step a recompute re-derives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputeStep {
    Mapping,
    Synthesis,
}

impl RecomputeStep {
    pub fn response_type(&self) -> ResponseType {
        match self {
            RecomputeStep::Mapping => ResponseType::Mapping,
            RecomputeStep::Synthesis => ResponseType::Synthesis,
        }
    }
}

impl std::fmt::Display for RecomputeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.response_type())
    }
}

impl std::str::FromStr for RecomputeStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mapping" => Ok(RecomputeStep::Mapping),
            "synthesis" => Ok(RecomputeStep::Synthesis),
            other => Err(format!("unknown step type: {}", other)),
        }
    }
}

/// Re-derive one downstream step of a past turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecomputeRequest {
    pub session_id: String,
    pub source_turn_id: String,
    pub step_type: RecomputeStep,
    pub target_provider: String,
    /// Overrides the source turn's original prompt when set.
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub use_thinking: bool,
}

/// A workflow request, tagged by primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowRequest {
    Initialize(InitializeRequest),
    Extend(ExtendRequest),
    Recompute(RecomputeRequest),
}

impl WorkflowRequest {
    pub fn initialize(user_message: impl Into<String>, options: TurnOptions) -> Self {
        Self::Initialize(InitializeRequest {
            user_message: user_message.into(),
            options,
        })
    }

    pub fn extend(
        session_id: impl Into<String>,
        user_message: impl Into<String>,
        options: TurnOptions,
    ) -> Self {
        Self::Extend(ExtendRequest {
            session_id: session_id.into(),
            user_message: user_message.into(),
            options,
            reset_providers: Vec::new(),
        })
    }

    pub fn recompute(
        session_id: impl Into<String>,
        source_turn_id: impl Into<String>,
        step_type: RecomputeStep,
        target_provider: impl Into<String>,
    ) -> Self {
        Self::Recompute(RecomputeRequest {
            session_id: session_id.into(),
            source_turn_id: source_turn_id.into(),
            step_type,
            target_provider: target_provider.into(),
            user_message: None,
            use_thinking: false,
        })
    }

    /// Primitive name, as used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowRequest::Initialize(_) => "initialize",
            WorkflowRequest::Extend(_) => "extend",
            WorkflowRequest::Recompute(_) => "recompute",
        }
    }

    pub fn is_recompute(&self) -> bool {
        matches!(self, WorkflowRequest::Recompute(_))
    }

    /// The session the request targets, if it targets an existing one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            WorkflowRequest::Initialize(_) => None,
            WorkflowRequest::Extend(r) => Some(&r.session_id),
            WorkflowRequest::Recompute(r) => Some(&r.session_id),
        }
    }

    pub fn user_message(&self) -> Option<&str> {
        match self {
            WorkflowRequest::Initialize(r) => Some(&r.user_message),
            WorkflowRequest::Extend(r) => Some(&r.user_message),
            WorkflowRequest::Recompute(r) => r.user_message.as_deref(),
        }
    }
}
