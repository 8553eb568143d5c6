//! Application-level configuration.
//!
//! - [`EngineConfig`]: how the workflow engine streams and schedules steps

pub mod engine_config;

pub use engine_config::EngineConfig;
