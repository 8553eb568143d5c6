//! Use cases
//!
//! Application-level operations that orchestrate domain logic.

pub mod compile_workflow;
pub mod execute_workflow;
pub mod persist_turn;
pub mod resolve_context;
pub mod run_workflow;

#[cfg(test)]
pub(crate) mod test_support;
