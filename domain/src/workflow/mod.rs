//! Workflow domain: requests, resolved contexts, compiled steps, results
//! and the events emitted while executing them.
//!
//! ```text
//! WorkflowRequest → ResolvedContext → CompiledWorkflow → StepResult* → WorkflowResult
//! ```

pub mod compiled;
pub mod event;
pub mod request;
pub mod resolved;
pub mod result;
