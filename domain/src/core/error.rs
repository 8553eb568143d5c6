//! Domain error types
//!
//! The pipeline distinguishes where a failure happened:
//!
//! - [`ContextError`]: resolution impossible (missing session, turn, outputs)
//! - [`ValidationError`]: malformed request / context pairing
//! - [`ProviderError`]: a provider call degraded (soft) or failed (hard)
//! - [`StepError`]: a mapping or synthesis step could not produce output
//! - [`PersistenceError`]: the turn could not be written

use thiserror::Error;

/// Errors raised while resolving the context of a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Missing required field for {primitive}: {field}")]
    MissingField {
        primitive: &'static str,
        field: &'static str,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {0} has no last turn to continue from")]
    NoLastTurn(String),

    #[error("Turn not found: {0}")]
    TurnNotFound(String),

    #[error("Turn {0} is not an AI turn")]
    NotAnAiTurn(String),

    #[error("Turn {turn_id} does not belong to session {session_id}")]
    SessionMismatch { session_id: String, turn_id: String },

    #[error("No batch outputs found for turn {0}")]
    NoBatchOutputs(String),

    #[error("Original user message not found for turn {0}")]
    UserMessageNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors raised by the workflow compiler before any step is compiled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Request has no usable message")]
    EmptyMessage,

    #[error("Request must name at least one provider, a mapper, or a synthesizer")]
    NothingToRun,

    #[error("Context type '{context}' does not match request type '{request}'")]
    ContextMismatch {
        request: &'static str,
        context: &'static str,
    },

    #[error("Invalid {context} context: {field} is missing")]
    IncompleteContext {
        context: &'static str,
        field: &'static str,
    },

    #[error("Request session {request} does not match resolved session {resolved}")]
    SessionMismatch { request: String, resolved: String },

    #[error("{0} step requires batch outputs, but no provider is asked to answer")]
    NoBatchSource(&'static str),
}

/// Error reported by the orchestrator for a single provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The call degraded but some text was salvaged.
    #[error("Provider {provider} degraded: {message}")]
    Soft { provider: String, message: String },

    /// The call produced no usable text.
    #[error("Provider {provider} failed: {message}")]
    Hard { provider: String, message: String },
}

impl ProviderError {
    pub fn soft(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Soft {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn hard(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hard {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Soft { provider, .. } | Self::Hard { provider, .. } => provider,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Soft { message, .. } | Self::Hard { message, .. } => message,
        }
    }

    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Hard { .. })
    }
}

/// Failure of a single workflow step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("All providers failed in step {0}")]
    AllProvidersFailed(String),

    #[error("No batch outputs available for step {0}")]
    NoSourceOutputs(String),

    #[error("Could not load source outputs: {0}")]
    SourceUnavailable(String),

    #[error("Synthesizer {0} has no sibling outputs to synthesize")]
    NoSiblingOutputs(String),

    #[error("Synthesis requires mapping step {0}, which produced no usable text (missing map)")]
    MissingMap(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Errors raised while writing a turn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Turn not found: {0}")]
    TurnNotFound(String),

    #[error("Turn {0} is not an AI turn")]
    NotAnAiTurn(String),

    #[error("Request type '{request}' cannot be persisted with '{context}' context")]
    ContextMismatch {
        request: &'static str,
        context: &'static str,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_accessors() {
        let soft = ProviderError::soft("claude", "rate limited");
        assert_eq!(soft.provider(), "claude");
        assert_eq!(soft.message(), "rate limited");
        assert!(!soft.is_hard());

        let hard = ProviderError::hard("gemini", "timeout");
        assert!(hard.is_hard());
        assert_eq!(hard.to_string(), "Provider gemini failed: timeout");
    }

    #[test]
    fn test_missing_map_message_names_the_step() {
        let err = StepError::MissingMap("mapping-2".to_string());
        assert!(err.to_string().contains("missing map"));
        assert!(err.to_string().contains("mapping-2"));
    }

    #[test]
    fn test_step_error_from_provider_error() {
        let err: StepError = ProviderError::hard("a", "boom").into();
        assert_eq!(err.to_string(), "Provider a failed: boom");
    }
}
