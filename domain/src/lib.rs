//! Domain layer for parley
//!
//! This crate contains the core entities, value objects and pure logic of
//! the workflow pipeline. It has no dependencies on infrastructure concerns.
//!
//! # Core Concepts
//!
//! ## Primitives
//!
//! Every request is one of three primitives:
//!
//! - **Initialize**: start a conversation (new session, turn pair at sequence 0/1)
//! - **Extend**: continue the mainline, advancing the session pointer
//! - **Recompute**: re-derive a mapping or synthesis of a past turn as an
//!   off-timeline branch (sequence `-1`), leaving the mainline untouched
//!
//! ## Steps
//!
//! A compiled workflow runs in three stages: **prompt** (fan-out to every
//! provider), **mapping** (narrate agreements and tensions) and **synthesis**
//! (merge answers, resolving the map when there is one).

pub mod conversation;
pub mod core;
pub mod prompt;
pub mod streaming;
pub mod util;
pub mod workflow;

// Re-export commonly used types
pub use conversation::{
    entities::{
        AiTurn, AiTurnMeta, BRANCH_SEQUENCE, DEFAULT_THREAD_ID, Session, Thread, Turn, UserTurn,
    },
    provider_context::ProviderContexts,
    response::{ProviderResponse, ResponseStatus, ResponseType},
};
pub use core::error::{ContextError, PersistenceError, ProviderError, StepError, ValidationError};
pub use prompt::PromptTemplate;
pub use streaming::delta::{Delta, DeltaConfig, DeltaTracker, delta_key};
pub use workflow::{
    compiled::{
        CompiledWorkflow, MappingPayload, PromptPayload, StepId, StepKind, StepPayload,
        StepSource, SynthesisPayload, WorkflowContext, WorkflowStep,
    },
    event::{StepStatus, WorkflowEvent},
    request::{
        ExtendRequest, InitializeRequest, RecomputeRequest, RecomputeStep, TurnOptions,
        WorkflowRequest,
    },
    resolved::{ExtendContext, FrozenOutput, RecomputeContext, ResolvedContext},
    result::{
        BatchStepResult, ProviderOutput, SingleProviderStepResult, StepResult, WorkflowOutputs,
        WorkflowResult,
    },
};
