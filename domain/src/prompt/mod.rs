//! Prompt templates for downstream workflow steps.

pub mod template;

pub use template::PromptTemplate;
