//! Events emitted while a workflow executes.

use super::compiled::{StepId, StepKind};
use super::result::{StepResult, WorkflowOutputs};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

/// An event in the workflow stream.
///
/// Events already delivered are never retracted, even when persistence fails
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StepUpdate {
        step_id: StepId,
        kind: StepKind,
        status: StepStatus,
        /// The step's output should not be shown yet.
        #[serde(default)]
        hidden: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<StepResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    PartialResult {
        step_id: StepId,
        provider_id: String,
        delta: String,
    },
    /// Canonical ids of the new mainline turn. Never emitted for recompute.
    TurnFinalized {
        session_id: String,
        user_turn_id: String,
        ai_turn_id: String,
    },
    WorkflowComplete {
        workflow_id: String,
        session_id: String,
        outputs: WorkflowOutputs,
    },
    WorkflowFailed {
        workflow_id: String,
        session_id: String,
        error: String,
    },
}

impl WorkflowEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkflowEvent::StepUpdate { .. } => "step_update",
            WorkflowEvent::PartialResult { .. } => "partial_result",
            WorkflowEvent::TurnFinalized { .. } => "turn_finalized",
            WorkflowEvent::WorkflowComplete { .. } => "workflow_complete",
            WorkflowEvent::WorkflowFailed { .. } => "workflow_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::WorkflowComplete { .. } | WorkflowEvent::WorkflowFailed { .. }
        )
    }
}
