//! Run Workflow use case
//!
//! One call per primitive: resolve → compile → execute (which persists).

use crate::config::EngineConfig;
use crate::ports::conversation_logger::ConversationLogger;
use crate::ports::conversation_store::ConversationStore;
use crate::ports::id_generator::IdGenerator;
use crate::ports::orchestrator::Orchestrator;
use crate::ports::workflow_events::{NoEventSink, WorkflowEventSink};
use crate::use_cases::compile_workflow::WorkflowCompiler;
use crate::use_cases::execute_workflow::{ExecuteWorkflowError, WorkflowEngine, WorkflowOutcome};
use crate::use_cases::persist_turn::TurnPersister;
use crate::use_cases::resolve_context::ContextResolver;
use parley_domain::{ContextError, ValidationError, WorkflowRequest};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while running a workflow
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunWorkflowError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecuteWorkflowError),
}

pub struct RunWorkflowUseCase {
    resolver: ContextResolver,
    compiler: WorkflowCompiler,
    engine: WorkflowEngine,
}

impl RunWorkflowUseCase {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        store: Arc<dyn ConversationStore>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let persister = TurnPersister::new(store.clone(), ids.clone());
        Self {
            resolver: ContextResolver::new(store.clone()),
            compiler: WorkflowCompiler::new(ids),
            engine: WorkflowEngine::new(orchestrator, store, persister),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.engine = self.engine.with_config(config);
        self
    }

    pub fn with_conversation_logger(mut self, logger: Arc<dyn ConversationLogger>) -> Self {
        self.engine = self.engine.with_conversation_logger(logger);
        self
    }

    /// Run without listening to events
    pub async fn execute(
        &self,
        request: WorkflowRequest,
    ) -> Result<WorkflowOutcome, RunWorkflowError> {
        self.execute_with_events(request, &NoEventSink).await
    }

    pub async fn execute_with_events(
        &self,
        request: WorkflowRequest,
        events: &dyn WorkflowEventSink,
    ) -> Result<WorkflowOutcome, RunWorkflowError> {
        let context = self.resolver.resolve(&request).await?;
        let workflow = self.compiler.compile(&request, &context)?;
        let outcome = self
            .engine
            .execute(&request, &workflow, &context, events)
            .await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::id_generator::SequentialIdGenerator;
    use crate::use_cases::test_support::{
        FakeStore, RecordingSink, Script, ScriptedOrchestrator, batch_row, seed_session,
    };
    use parley_domain::{
        RecomputeStep, ResponseStatus, ResponseType, StepError, StepKind, StepStatus,
        TurnOptions, WorkflowEvent,
    };
    use serde_json::json;
    use std::sync::atomic::Ordering;

    struct Harness {
        store: Arc<FakeStore>,
        orchestrator: Arc<ScriptedOrchestrator>,
        sink: RecordingSink,
        use_case: RunWorkflowUseCase,
    }

    fn harness() -> Harness {
        let store = Arc::new(FakeStore::new());
        let orchestrator = Arc::new(ScriptedOrchestrator::new());
        let use_case = RunWorkflowUseCase::new(
            orchestrator.clone(),
            store.clone(),
            Arc::new(SequentialIdGenerator::new()),
        );
        Harness {
            store,
            orchestrator,
            sink: RecordingSink::new(),
            use_case,
        }
    }

    fn options(providers: &[&str]) -> TurnOptions {
        TurnOptions::new(providers.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn test_initialize_two_providers() {
        let h = harness();
        h.orchestrator
            .script("a", Script::streamed(&["Hel", "Hello", "Hello world"]));

        let outcome = h
            .use_case
            .execute_with_events(
                WorkflowRequest::initialize("Say hello", options(&["a", "b"])),
                &h.sink,
            )
            .await
            .unwrap();

        assert_eq!(outcome.outputs.batch_outputs.len(), 2);
        assert_eq!(outcome.outputs.batch_outputs["a"].text, "Hello world");
        let receipt = outcome.receipt().unwrap();

        let session = h.store.session(&outcome.session_id).unwrap();
        assert_eq!(session.turn_count, 2);
        assert_eq!(session.last_turn_id, receipt.ai_turn_id);

        let turns = h.store.all_turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns.iter().filter(|t| t.as_user().is_some()).count(), 1);
        let ai = h.store.ai_turn(receipt.ai_turn_id.as_deref().unwrap()).unwrap();
        assert_eq!(ai.sequence, 1);
        assert_eq!(ai.provider_contexts.get("b"), Some(&json!({"chat": "b-chat"})));

        let deltas: String = h
            .sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                WorkflowEvent::PartialResult {
                    provider_id, delta, ..
                } if provider_id == "a" => Some(delta),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, "Hello world");

        assert_eq!(h.sink.count("turn_finalized"), 1);
        let events = h.sink.events();
        assert!(matches!(
            events.last(),
            Some(WorkflowEvent::WorkflowComplete { .. })
        ));
        let finalized = events
            .iter()
            .find_map(|e| match e {
                WorkflowEvent::TurnFinalized { user_turn_id, .. } => Some(user_turn_id.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(finalized, outcome.user_turn_id);
    }

    #[tokio::test]
    async fn test_partial_provider_failure_proceeds() {
        let h = harness();
        h.orchestrator.script("b", Script::fail("timeout"));

        let outcome = h
            .use_case
            .execute(WorkflowRequest::initialize("q", options(&["a", "b"])))
            .await
            .unwrap();

        assert_eq!(
            outcome.outputs.batch_outputs["b"].status,
            ResponseStatus::Failed
        );
        assert!(outcome.receipt().is_some());
        let failed_row = h
            .store
            .all_responses()
            .into_iter()
            .find(|r| r.provider_id == "b")
            .unwrap();
        assert_eq!(failed_row.status, ResponseStatus::Failed);
    }

    #[tokio::test]
    async fn test_all_providers_failing_is_fatal() {
        let h = harness();
        h.orchestrator.script("a", Script::fail("down"));
        h.orchestrator.script("b", Script::reply("   "));

        let err = h
            .use_case
            .execute_with_events(WorkflowRequest::initialize("q", options(&["a", "b"])), &h.sink)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RunWorkflowError::Execution(ExecuteWorkflowError::PromptFailed {
                source: StepError::AllProvidersFailed(_),
                ..
            })
        ));
        assert_eq!(h.sink.count("workflow_failed"), 1);
        assert_eq!(h.sink.count("workflow_complete"), 0);
        assert_eq!(h.store.commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mapping_failure_yields_missing_map_synthesis() {
        let h = harness();
        let mut opts = options(&["a", "b"]);
        opts.include_mapping = true;
        opts.mapper = Some("a".to_string());
        opts.synthesizer = Some("b".to_string());
        // a answers the batch, then fails the mapping call
        h.orchestrator.script("a", Script::reply("A batch"));
        h.orchestrator.script("a", Script::fail("mapping crashed"));

        let outcome = h
            .use_case
            .execute_with_events(WorkflowRequest::initialize("q", opts), &h.sink)
            .await
            .unwrap();

        let synthesis = &outcome.outputs.synthesis_outputs["b"];
        assert_eq!(synthesis.status, ResponseStatus::Failed);
        assert!(synthesis.error.as_deref().unwrap().contains("missing map"));
        assert_eq!(
            outcome.outputs.mapping_outputs["a"].status,
            ResponseStatus::Failed
        );
        assert!(
            outcome
                .step_errors
                .values()
                .any(|e| matches!(e, StepError::MissingMap(_)))
        );
        // the synthesizer was never called
        assert!(
            h.orchestrator
                .calls()
                .iter()
                .all(|c| c.providers != vec!["b".to_string()])
        );
        assert!(outcome.receipt().is_some());
        assert_eq!(h.sink.count("turn_finalized"), 1);
    }

    #[tokio::test]
    async fn test_synthesis_excludes_own_answer_and_embeds_map() {
        let h = harness();
        let mut opts = options(&["a", "b"]);
        opts.include_mapping = true;
        opts.synthesizer = Some("a".to_string());
        h.orchestrator.script("a", Script::reply("A-BATCH"));
        h.orchestrator.script("b", Script::reply("B-BATCH"));
        h.orchestrator.script("a", Script::reply("THE-MAP"));
        h.orchestrator.script("a", Script::reply("merged"));

        let outcome = h
            .use_case
            .execute(WorkflowRequest::initialize("q", opts))
            .await
            .unwrap();

        assert_eq!(outcome.outputs.mapping_outputs["a"].text, "THE-MAP");
        assert_eq!(outcome.outputs.synthesis_outputs["a"].text, "merged");

        let calls = h.orchestrator.calls();
        let synthesis_prompt = &calls.last().unwrap().prompt;
        assert!(synthesis_prompt.contains("B-BATCH"));
        assert!(!synthesis_prompt.contains("A-BATCH"));
        assert!(synthesis_prompt.contains("THE-MAP"));

        // mapping sees every answer
        assert!(calls[1].prompt.contains("A-BATCH"));
        assert!(calls[1].prompt.contains("B-BATCH"));
    }

    #[tokio::test]
    async fn test_synthesizer_without_siblings_fails() {
        let h = harness();
        let mut opts = options(&["a"]);
        opts.synthesizer = Some("a".to_string());

        let outcome = h
            .use_case
            .execute(WorkflowRequest::initialize("q", opts))
            .await
            .unwrap();

        assert!(
            outcome
                .step_errors
                .values()
                .any(|e| matches!(e, StepError::NoSiblingOutputs(_)))
        );
        assert_eq!(
            outcome.outputs.synthesis_outputs["a"].status,
            ResponseStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_recompute_synthesis_seeds_frozen_batch() {
        let h = harness();
        let before = seed_session(
            &h.store,
            json!({"b": {"chat": "b-old"}}),
            &[("a", "A frozen"), ("b", "B frozen")],
        );

        let outcome = h
            .use_case
            .execute_with_events(
                WorkflowRequest::recompute("s-1", "ai-1", RecomputeStep::Synthesis, "b"),
                &h.sink,
            )
            .await
            .unwrap();

        let calls = h.orchestrator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].providers, vec!["b".to_string()]);
        assert!(calls[0].prompt.contains("A frozen"));
        assert!(calls[0].prompt.contains("What is Rust?"));
        assert_eq!(
            calls[0].provider_contexts.get("b"),
            Some(&json!({"chat": "b-old"}))
        );

        assert!(
            !outcome
                .step_results
                .keys()
                .any(|id| id.as_str().starts_with(StepKind::Prompt.as_str()))
        );
        assert!(outcome.outputs.batch_outputs.is_empty());
        assert_eq!(h.store.session("s-1").unwrap(), before);
        assert_eq!(h.sink.count("turn_finalized"), 0);
        assert_eq!(h.sink.count("workflow_complete"), 1);

        let branch = h
            .store
            .ai_turn(outcome.receipt().unwrap().ai_turn_id.as_deref().unwrap())
            .unwrap();
        assert!(branch.is_branch());
        let rows: Vec<_> = h
            .store
            .all_responses()
            .into_iter()
            .filter(|r| r.ai_turn_id == branch.id)
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].response_type, ResponseType::Synthesis);
    }

    #[tokio::test]
    async fn test_recompute_mapping_reads_frozen_batch() {
        let h = harness();
        let before = seed_session(
            &h.store,
            json!({"a": {"chat": "a-old"}}),
            &[("a", "A frozen"), ("b", "B frozen")],
        );

        let outcome = h
            .use_case
            .execute_with_events(
                WorkflowRequest::recompute("s-1", "ai-1", RecomputeStep::Mapping, "a"),
                &h.sink,
            )
            .await
            .unwrap();

        let calls = h.orchestrator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].providers, vec!["a".to_string()]);
        assert!(calls[0].prompt.contains("A frozen"));
        assert!(calls[0].prompt.contains("B frozen"));
        assert_eq!(
            calls[0].provider_contexts.get("a"),
            Some(&json!({"chat": "a-old"}))
        );

        assert_eq!(outcome.outputs.mapping_outputs["a"].text, "a answer");
        assert!(outcome.outputs.batch_outputs.is_empty());
        assert!(outcome.outputs.synthesis_outputs.is_empty());
        assert_eq!(h.store.session("s-1").unwrap(), before);
        assert_eq!(h.sink.count("turn_finalized"), 0);

        let branch = h
            .store
            .ai_turn(outcome.receipt().unwrap().ai_turn_id.as_deref().unwrap())
            .unwrap();
        assert!(branch.is_branch());
        assert_eq!(branch.meta.source_turn_id.as_deref(), Some("ai-1"));
        assert_eq!(branch.meta.recomputed_step, Some(ResponseType::Mapping));
        let rows: Vec<_> = h
            .store
            .all_responses()
            .into_iter()
            .filter(|r| r.ai_turn_id == branch.id)
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].response_type, ResponseType::Mapping);
    }

    #[tokio::test]
    async fn test_recompute_falls_back_to_frozen_batch_meta() {
        let h = harness();
        // The source turn recorded no context for "b", but its batch row kept one.
        seed_session(&h.store, json!({"a": {"chat": "a-old"}}), &[("a", "A frozen")]);
        let mut row = batch_row("ai-1", "b", "B frozen", ResponseStatus::Completed);
        row.meta = json!({"chat": "b-frozen"});
        h.store.insert_response(row);

        h.use_case
            .execute(WorkflowRequest::recompute(
                "s-1",
                "ai-1",
                RecomputeStep::Synthesis,
                "b",
            ))
            .await
            .unwrap();

        let calls = h.orchestrator.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].prompt.contains("A frozen"));
        assert_eq!(
            calls[0].provider_contexts.get("b"),
            Some(&json!({"chat": "b-frozen"}))
        );
        assert!(!calls[0].provider_contexts.contains("a"));
    }

    #[tokio::test]
    async fn test_extend_new_provider_without_context() {
        let h = harness();
        seed_session(
            &h.store,
            json!({"a": {"chat": "a-1"}, "b": {"chat": "b-1"}}),
            &[("a", "x"), ("b", "y")],
        );

        let outcome = h
            .use_case
            .execute_with_events(
                WorkflowRequest::extend("s-1", "follow up", options(&["a", "c"])),
                &h.sink,
            )
            .await
            .unwrap();

        let call = &h.orchestrator.calls()[0];
        assert_eq!(call.provider_contexts.get("a"), Some(&json!({"chat": "a-1"})));
        assert!(!call.provider_contexts.contains("c"));
        assert!(!call.provider_contexts.contains("b"));

        let receipt = outcome.receipt().unwrap();
        let session = h.store.session("s-1").unwrap();
        assert_eq!(session.turn_count, 4);
        assert_eq!(session.last_turn_id, receipt.ai_turn_id);

        let ai = h.store.ai_turn(receipt.ai_turn_id.as_deref().unwrap()).unwrap();
        assert_eq!(ai.sequence, 3);
        // previous minus updated, plus new
        assert_eq!(ai.provider_contexts.get("a"), Some(&json!({"chat": "a-chat"})));
        assert_eq!(ai.provider_contexts.get("b"), Some(&json!({"chat": "b-1"})));
        assert_eq!(ai.provider_contexts.get("c"), Some(&json!({"chat": "c-chat"})));
        assert_eq!(h.sink.count("turn_finalized"), 1);
    }

    #[tokio::test]
    async fn test_extend_synthesis_only_uses_previous_batch() {
        let h = harness();
        seed_session(&h.store, json!({"b": {"chat": "b-1"}}), &[("a", "A old"), ("b", "B old")]);
        let opts = TurnOptions {
            synthesizer: Some("b".to_string()),
            ..Default::default()
        };

        let outcome = h
            .use_case
            .execute(WorkflowRequest::extend("s-1", "summarize", opts))
            .await
            .unwrap();

        let calls = h.orchestrator.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].prompt.contains("A old"));
        assert!(!calls[0].prompt.contains("B old"));
        // tier 3: context comes from the persisted mainline turn
        assert_eq!(
            calls[0].provider_contexts.get("b"),
            Some(&json!({"chat": "b-1"}))
        );
        assert_eq!(outcome.outputs.synthesis_outputs["b"].text, "b answer");
    }

    #[tokio::test]
    async fn test_mapping_reuses_context_from_same_run() {
        let h = harness();
        let mut opts = options(&["a", "b"]);
        opts.include_mapping = true;
        h.orchestrator
            .script("a", Script::reply_with_meta("A", json!({"chat": "fresh-a"})));

        h.use_case
            .execute(WorkflowRequest::initialize("q", opts))
            .await
            .unwrap();

        let calls = h.orchestrator.calls();
        assert_eq!(
            calls[1].provider_contexts.get("a"),
            Some(&json!({"chat": "fresh-a"}))
        );
    }

    #[tokio::test]
    async fn test_soft_error_output_is_usable() {
        let h = harness();
        h.orchestrator.script(
            "a",
            Script::Soft {
                text: "salvaged".to_string(),
                message: "rate limited".to_string(),
            },
        );

        let outcome = h
            .use_case
            .execute(WorkflowRequest::initialize("q", options(&["a"])))
            .await
            .unwrap();

        let a = &outcome.outputs.batch_outputs["a"];
        assert!(a.is_usable());
        assert_eq!(a.soft_error.as_deref(), Some("rate limited"));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_events() {
        let h = harness();
        h.store.fail_commits.store(true, Ordering::SeqCst);

        let outcome = h
            .use_case
            .execute_with_events(WorkflowRequest::initialize("q", options(&["a"])), &h.sink)
            .await
            .unwrap();

        assert!(outcome.persisted.is_err());
        assert_eq!(h.sink.count("turn_finalized"), 0);
        assert_eq!(h.sink.count("workflow_complete"), 1);
        assert!(h.sink.events().iter().any(|e| matches!(
            e,
            WorkflowEvent::StepUpdate {
                status: StepStatus::Completed,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_validation_error_aborts_before_provider_calls() {
        let h = harness();

        let err = h
            .use_case
            .execute(WorkflowRequest::initialize("", options(&["a"])))
            .await
            .unwrap_err();

        assert_eq!(err, RunWorkflowError::Validation(ValidationError::EmptyMessage));
        assert!(h.orchestrator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_context_error_aborts_before_provider_calls() {
        let h = harness();

        let err = h
            .use_case
            .execute(WorkflowRequest::extend("missing", "q", options(&["a"])))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RunWorkflowError::Context(ContextError::SessionNotFound(_))
        ));
        assert!(h.orchestrator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sequential_stage_steps_give_same_result() {
        let store = Arc::new(FakeStore::new());
        let orchestrator = Arc::new(ScriptedOrchestrator::new());
        let use_case = RunWorkflowUseCase::new(
            orchestrator.clone(),
            store.clone(),
            Arc::new(SequentialIdGenerator::new()),
        )
        .with_config(EngineConfig::default().with_concurrent_stage_steps(false));

        let mut opts = options(&["a", "b"]);
        opts.include_mapping = true;
        opts.synthesizer = Some("b".to_string());

        let outcome = use_case
            .execute(WorkflowRequest::initialize("q", opts))
            .await
            .unwrap();

        assert!(outcome.step_errors.is_empty());
        assert_eq!(outcome.outputs.mapping_outputs.len(), 1);
        assert_eq!(outcome.outputs.synthesis_outputs.len(), 1);
    }
}
