//! Orchestrator adapters.

mod process;

pub use process::{CONTEXT_MARKER, ProcessOrchestrator, ProviderCommand};
