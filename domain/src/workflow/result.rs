//! Step and workflow results.
//!
//! A prompt step produces one output per provider while mapping and synthesis
//! steps produce a single provider's output. Both shapes are normalized into
//! [`StepResult`] at the engine boundary so downstream code matches on one
//! tagged union.

use super::resolved::FrozenOutput;
use crate::conversation::provider_context::{ProviderContexts, is_empty_meta};
use crate::conversation::response::{ResponseStatus, ResponseType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One provider's output within a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
    pub provider_id: String,
    pub text: String,
    pub status: ResponseStatus,
    /// Continuation metadata returned by the provider.
    #[serde(default)]
    pub meta: Value,
    /// Set when the text was salvaged from a degraded call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderOutput {
    pub fn completed(provider_id: impl Into<String>, text: impl Into<String>, meta: Value) -> Self {
        Self {
            provider_id: provider_id.into(),
            text: text.into(),
            status: ResponseStatus::Completed,
            meta,
            soft_error: None,
            error: None,
        }
    }

    pub fn failed(provider_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            text: String::new(),
            status: ResponseStatus::Failed,
            meta: Value::Null,
            soft_error: None,
            error: Some(error.into()),
        }
    }

    pub fn with_soft_error(mut self, message: impl Into<String>) -> Self {
        self.soft_error = Some(message.into());
        self
    }

    /// Whether the output carries text a later step can consume.
    pub fn is_usable(&self) -> bool {
        self.status == ResponseStatus::Completed && !self.text.trim().is_empty()
    }

    /// Continuation metadata worth carrying into the turn, if any.
    pub fn context_meta(&self) -> Option<&Value> {
        (!is_empty_meta(&self.meta)).then_some(&self.meta)
    }
}

impl From<&FrozenOutput> for ProviderOutput {
    fn from(frozen: &FrozenOutput) -> Self {
        Self {
            provider_id: frozen.provider_id.clone(),
            text: frozen.text.clone(),
            status: ResponseStatus::Completed,
            meta: frozen.meta.clone(),
            soft_error: None,
            error: None,
        }
    }
}

/// Result of a prompt step: one output per provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStepResult {
    pub outputs: BTreeMap<String, ProviderOutput>,
}

impl BatchStepResult {
    pub fn from_frozen(frozen: &BTreeMap<String, FrozenOutput>) -> Self {
        Self {
            outputs: frozen
                .iter()
                .map(|(provider, output)| (provider.clone(), ProviderOutput::from(output)))
                .collect(),
        }
    }

    /// Outputs usable as inputs of mapping or synthesis, in provider order.
    pub fn usable(&self) -> impl Iterator<Item = &ProviderOutput> {
        self.outputs.values().filter(|o| o.is_usable())
    }

    pub fn has_usable(&self) -> bool {
        self.usable().next().is_some()
    }
}

/// Result of a mapping or synthesis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleProviderStepResult {
    pub output: ProviderOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum StepResult {
    Batch(BatchStepResult),
    Single(SingleProviderStepResult),
}

impl StepResult {
    pub fn as_batch(&self) -> Option<&BatchStepResult> {
        match self {
            StepResult::Batch(b) => Some(b),
            StepResult::Single(_) => None,
        }
    }

    pub fn as_single(&self) -> Option<&SingleProviderStepResult> {
        match self {
            StepResult::Single(s) => Some(s),
            StepResult::Batch(_) => None,
        }
    }
}

/// Everything a workflow produced, keyed by provider per response type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutputs {
    pub batch_outputs: BTreeMap<String, ProviderOutput>,
    pub mapping_outputs: BTreeMap<String, ProviderOutput>,
    pub synthesis_outputs: BTreeMap<String, ProviderOutput>,
}

impl WorkflowOutputs {
    pub fn outputs_of(&self, response_type: ResponseType) -> &BTreeMap<String, ProviderOutput> {
        match response_type {
            ResponseType::Batch => &self.batch_outputs,
            ResponseType::Mapping => &self.mapping_outputs,
            ResponseType::Synthesis => &self.synthesis_outputs,
        }
    }

    /// All outputs tagged with their response type.
    pub fn iter_all(&self) -> impl Iterator<Item = (ResponseType, &ProviderOutput)> {
        self.batch_outputs
            .values()
            .map(|o| (ResponseType::Batch, o))
            .chain(self.mapping_outputs.values().map(|o| (ResponseType::Mapping, o)))
            .chain(
                self.synthesis_outputs
                    .values()
                    .map(|o| (ResponseType::Synthesis, o)),
            )
    }

    /// Continuation metadata produced this turn. Later steps win over earlier
    /// ones for the same provider since they reflect its latest exchange.
    pub fn harvested_contexts(&self) -> ProviderContexts {
        let mut contexts = ProviderContexts::new();
        for (_, output) in self.iter_all() {
            if let Some(meta) = output.context_meta() {
                contexts.insert(output.provider_id.clone(), meta.clone());
            }
        }
        contexts
    }

    pub fn is_empty(&self) -> bool {
        self.batch_outputs.is_empty()
            && self.mapping_outputs.is_empty()
            && self.synthesis_outputs.is_empty()
    }
}

/// Normalized result handed to persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub session_id: String,
    pub thread_id: String,
    pub user_turn_id: String,
    pub user_message: String,
    pub outputs: WorkflowOutputs,
}
