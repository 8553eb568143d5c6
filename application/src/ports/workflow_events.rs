//! Workflow event port
//!
//! The engine reports progress as a stream of [`WorkflowEvent`]s. Sinks live in
//! the presentation side (console printer, channel to a UI...).

use parley_domain::WorkflowEvent;
use tokio::sync::mpsc;

/// Receives workflow events in emission order.
pub trait WorkflowEventSink: Send + Sync {
    fn emit(&self, event: WorkflowEvent);
}

/// No-op sink for when nobody listens.
pub struct NoEventSink;

impl WorkflowEventSink for NoEventSink {
    fn emit(&self, _event: WorkflowEvent) {}
}

/// Sink forwarding events into an unbounded channel.
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl WorkflowEventSink for ChannelEventSink {
    fn emit(&self, event: WorkflowEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_domain::StepId;

    #[tokio::test]
    async fn test_channel_sink_preserves_order() {
        let (sink, mut rx) = ChannelEventSink::new();
        for delta in ["a", "b"] {
            sink.emit(WorkflowEvent::PartialResult {
                step_id: StepId::new("prompt-1"),
                provider_id: "p".to_string(),
                delta: delta.to_string(),
            });
        }
        drop(sink);

        let mut deltas = Vec::new();
        while let Some(WorkflowEvent::PartialResult { delta, .. }) = rx.recv().await {
            deltas.push(delta);
        }
        assert_eq!(deltas, vec!["a", "b"]);
    }
}
