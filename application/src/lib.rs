//! Application layer for parley
//!
//! This crate contains use cases, port definitions, and application configuration.
//! It depends only on the domain layer.

pub mod config;
pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use config::EngineConfig;
pub use ports::{
    conversation_logger::{ConversationLogger, NoConversationLogger, TranscriptEntry},
    conversation_store::{ConversationStore, StoreError, StoreRecord, WriteBatch},
    id_generator::{IdGenerator, SequentialIdGenerator, UuidIdGenerator},
    orchestrator::{
        FanoutObserver, FanoutOutcome, FanoutRequest, FanoutResult, NoFanoutObserver,
        Orchestrator, PartialChunk,
    },
    workflow_events::{ChannelEventSink, NoEventSink, WorkflowEventSink},
};
pub use use_cases::compile_workflow::WorkflowCompiler;
pub use use_cases::execute_workflow::{ExecuteWorkflowError, WorkflowEngine, WorkflowOutcome};
pub use use_cases::persist_turn::{PersistReceipt, TurnPersister};
pub use use_cases::resolve_context::{ContextResolver, freeze_batch_outputs};
pub use use_cases::run_workflow::{RunWorkflowError, RunWorkflowUseCase};
