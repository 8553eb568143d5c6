//! Infrastructure layer for parley
//!
//! This crate contains adapters that implement the ports defined in the
//! application layer: conversation stores, the subprocess orchestrator,
//! the JSONL transcript and configuration file loading.

pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod storage;

// Re-export commonly used types
pub use config::{
    ConfigLoader, ConfigValidationError, FileConfig, FileDefaultsConfig, FileEngineConfig,
    FileLoggingConfig, FileProviderConfig, FileStorageConfig,
};
pub use logging::JsonlConversationLogger;
pub use orchestrator::{CONTEXT_MARKER, ProcessOrchestrator, ProviderCommand};
pub use storage::{ConversationTables, InMemoryConversationStore, JsonFileConversationStore};
