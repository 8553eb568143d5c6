//! Port for the workflow transcript.
//!
//! [`ConversationLogger`] records what a workflow did (requests, step
//! outcomes, persisted ids) as machine-readable records. `tracing` keeps the
//! human-readable diagnostics; this port keeps the transcript.

use serde_json::Value;

/// One transcript record: a type tag plus an event-specific JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    /// `workflow_started`, `step_completed`, `step_failed`, `workflow_persisted`...
    pub event_type: &'static str,
    pub payload: Value,
}

impl TranscriptEntry {
    pub fn new(event_type: &'static str, payload: Value) -> Self {
        Self {
            event_type,
            payload,
        }
    }
}

/// Writes transcript records. Never fails the workflow: sinks swallow their
/// own I/O errors.
pub trait ConversationLogger: Send + Sync {
    fn log(&self, entry: TranscriptEntry);
}

/// Logger used when no transcript file is configured.
pub struct NoConversationLogger;

impl ConversationLogger for NoConversationLogger {
    fn log(&self, _entry: TranscriptEntry) {}
}
