//! Port definitions (interfaces for external adapters)
//!
//! Ports define the contracts that infrastructure adapters must implement.

pub mod conversation_logger;
pub mod conversation_store;
pub mod id_generator;
pub mod orchestrator;
pub mod workflow_events;
