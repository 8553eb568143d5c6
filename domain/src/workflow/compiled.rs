//! Compiled workflow: the ordered steps the engine executes.

use crate::conversation::provider_context::ProviderContexts;
use crate::conversation::response::ResponseType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identifier of a compiled step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of step. The order of variants is the execution order of stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Prompt,
    Mapping,
    Synthesis,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Prompt => "prompt",
            StepKind::Mapping => "mapping",
            StepKind::Synthesis => "synthesis",
        }
    }

    /// The response type rows of this step are stored under.
    pub fn response_type(&self) -> ResponseType {
        match self {
            StepKind::Prompt => ResponseType::Batch,
            StepKind::Mapping => ResponseType::Mapping,
            StepKind::Synthesis => ResponseType::Synthesis,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a mapping or synthesis step reads its batch answers from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSource {
    /// A prompt step of the same workflow.
    Step { step_id: StepId },
    /// Responses persisted on a past turn.
    Historical {
        turn_id: String,
        response_type: ResponseType,
    },
}

/// Fan-out of the user's prompt to every requested provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPayload {
    pub prompt: String,
    pub providers: Vec<String>,
    /// Only set when continuing a conversation.
    pub provider_contexts: Option<ProviderContexts>,
    pub provider_meta: BTreeMap<String, Value>,
    /// Batch answers stay hidden until synthesis completes.
    pub hidden: bool,
    pub use_thinking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingPayload {
    pub mapping_provider: String,
    pub source: StepSource,
    pub original_prompt: String,
    pub use_thinking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisPayload {
    pub synthesis_provider: String,
    pub source: StepSource,
    /// Mapping step whose output must be embedded as the conflict map.
    pub mapping_step_id: Option<StepId>,
    pub original_prompt: String,
    pub use_thinking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepPayload {
    Prompt(PromptPayload),
    Mapping(MappingPayload),
    Synthesis(SynthesisPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_id: StepId,
    pub payload: StepPayload,
}

impl WorkflowStep {
    pub fn kind(&self) -> StepKind {
        match self.payload {
            StepPayload::Prompt(_) => StepKind::Prompt,
            StepPayload::Mapping(_) => StepKind::Mapping,
            StepPayload::Synthesis(_) => StepKind::Synthesis,
        }
    }
}

/// Identity of the turn a workflow produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub session_id: String,
    pub thread_id: String,
    pub target_user_turn_id: String,
    pub user_message: String,
    /// The session was minted by this workflow.
    pub session_created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledWorkflow {
    pub workflow_id: String,
    pub context: WorkflowContext,
    pub steps: Vec<WorkflowStep>,
}

impl CompiledWorkflow {
    /// Steps of one stage, in compiled order.
    pub fn steps_of(&self, kind: StepKind) -> impl Iterator<Item = &WorkflowStep> {
        self.steps.iter().filter(move |s| s.kind() == kind)
    }

    pub fn has_step(&self, kind: StepKind) -> bool {
        self.steps_of(kind).next().is_some()
    }
}
