//! Engine parameters.
//!
//! [`EngineConfig`] groups the knobs of
//! [`WorkflowEngine`](crate::use_cases::execute_workflow::WorkflowEngine).
//! The infrastructure layer builds it from the `[streaming]` and `[engine]`
//! tables of the configuration file.

use parley_domain::DeltaConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delta computation thresholds for streamed partials.
    pub streaming: DeltaConfig,
    /// Run the steps of one stage concurrently. When false they run one
    /// after another in compiled order.
    pub concurrent_stage_steps: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            streaming: DeltaConfig::default(),
            concurrent_stage_steps: true,
        }
    }
}

impl EngineConfig {
    // ==================== Builder Methods ====================

    pub fn with_streaming(mut self, streaming: DeltaConfig) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_concurrent_stage_steps(mut self, enabled: bool) -> Self {
        self.concurrent_stage_steps = enabled;
        self
    }
}
