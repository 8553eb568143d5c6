//! Orchestrator port
//!
//! Defines how the engine dispatches one prompt to several providers at once.
//! Timeouts, retries and circuit breaking belong to the implementation; the
//! engine only relies on the call resolving once every provider has reached a
//! terminal state.

use async_trait::async_trait;
use parley_domain::{ProviderContexts, ProviderError};
use serde_json::Value;
use std::collections::BTreeMap;

/// A cumulative snapshot of one provider's text so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialChunk {
    pub text: String,
}

impl PartialChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// One fan-out call.
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutRequest {
    pub prompt: String,
    pub providers: Vec<String>,
    pub session_id: String,
    pub use_thinking: bool,
    /// Continuation metadata for providers resuming a prior exchange.
    pub provider_contexts: ProviderContexts,
    pub provider_meta: BTreeMap<String, Value>,
}

/// Final text of one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutResult {
    pub text: String,
    /// Continuation metadata to resume this exchange later.
    pub meta: Value,
    /// Set when the text was salvaged from a degraded call. Always
    /// `ProviderError::Soft`.
    pub soft_error: Option<ProviderError>,
}

impl FanoutResult {
    pub fn new(text: impl Into<String>, meta: Value) -> Self {
        Self {
            text: text.into(),
            meta,
            soft_error: None,
        }
    }

    /// Text kept from a call that degraded before finishing.
    pub fn salvaged(
        text: impl Into<String>,
        meta: Value,
        provider: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            meta,
            soft_error: Some(ProviderError::soft(provider, message)),
        }
    }
}

/// Everything a fan-out call produced, delivered exactly once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanoutOutcome {
    pub results: BTreeMap<String, FanoutResult>,
    pub errors: BTreeMap<String, ProviderError>,
}

/// Receives partial snapshots while a fan-out call is running.
///
/// Snapshots from different providers may interleave freely.
pub trait FanoutObserver: Send + Sync {
    fn on_partial(&self, provider_id: &str, chunk: &PartialChunk);
}

/// Observer that ignores partials.
pub struct NoFanoutObserver;

impl FanoutObserver for NoFanoutObserver {
    fn on_partial(&self, _provider_id: &str, _chunk: &PartialChunk) {}
}

/// Dispatches prompts to providers.
///
/// Implementations (adapters) live in the infrastructure layer.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Send `request.prompt` to every provider concurrently.
    ///
    /// `observer.on_partial` may be called any number of times per provider
    /// before the returned future resolves. Per-provider failures are reported
    /// in [`FanoutOutcome::errors`], never as a panic or a dropped future.
    async fn execute_parallel_fanout(
        &self,
        request: FanoutRequest,
        observer: &dyn FanoutObserver,
    ) -> FanoutOutcome;
}
