//! Execute Workflow use case
//!
//! Runs a [`CompiledWorkflow`] against the [`Orchestrator`]:
//!
//! 1. **Prompt** steps, one after another. A prompt step where no provider
//!    produced usable text fails the whole workflow.
//! 2. **Mapping** steps, concurrently. Failures are isolated.
//! 3. **Synthesis** steps, concurrently. Failures are isolated, except that a
//!    synthesis depending on a mapping without usable text fails with a
//!    missing-map error.
//!
//! Streamed snapshots are turned into deltas by a [`DeltaTracker`] owned by
//! the execution. Once every step has settled the result is persisted inline
//! and the terminal events are emitted.

use crate::config::EngineConfig;
use crate::ports::conversation_logger::{
    ConversationLogger, NoConversationLogger, TranscriptEntry,
};
use crate::ports::conversation_store::{ConversationStore, StoreError};
use crate::ports::orchestrator::{
    FanoutObserver, FanoutOutcome, FanoutRequest, Orchestrator, PartialChunk,
};
use crate::ports::workflow_events::WorkflowEventSink;
use crate::use_cases::persist_turn::{PersistReceipt, TurnPersister};
use crate::use_cases::resolve_context::freeze_batch_outputs;
use futures::future::join_all;
use parley_domain::{
    BatchStepResult, CompiledWorkflow, Delta, DeltaTracker, MappingPayload, PersistenceError,
    PromptPayload, PromptTemplate, ProviderContexts, ProviderError, ProviderOutput,
    ResolvedContext, SingleProviderStepResult, StepError, StepId, StepKind, StepPayload,
    StepResult, StepSource, StepStatus, SynthesisPayload, WorkflowEvent, WorkflowOutputs,
    WorkflowRequest, WorkflowResult, WorkflowStep, delta_key,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that abort a workflow
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecuteWorkflowError {
    #[error("Prompt step {step_id} failed: {source}")]
    PromptFailed { step_id: StepId, source: StepError },
}

/// Everything one execution produced.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub workflow_id: String,
    pub session_id: String,
    pub user_turn_id: String,
    pub outputs: WorkflowOutputs,
    pub step_results: BTreeMap<StepId, StepResult>,
    pub step_errors: BTreeMap<StepId, StepError>,
    /// Persistence failures are reported here; emitted events stand.
    pub persisted: Result<PersistReceipt, PersistenceError>,
}

impl WorkflowOutcome {
    pub fn receipt(&self) -> Option<&PersistReceipt> {
        self.persisted.as_ref().ok()
    }
}

pub struct WorkflowEngine {
    orchestrator: Arc<dyn Orchestrator>,
    store: Arc<dyn ConversationStore>,
    persister: TurnPersister,
    conversation_logger: Arc<dyn ConversationLogger>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        store: Arc<dyn ConversationStore>,
        persister: TurnPersister,
    ) -> Self {
        Self {
            orchestrator,
            store,
            persister,
            conversation_logger: Arc::new(NoConversationLogger),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_conversation_logger(mut self, logger: Arc<dyn ConversationLogger>) -> Self {
        self.conversation_logger = logger;
        self
    }

    pub async fn execute(
        &self,
        request: &WorkflowRequest,
        workflow: &CompiledWorkflow,
        context: &ResolvedContext,
        events: &dyn WorkflowEventSink,
    ) -> Result<WorkflowOutcome, ExecuteWorkflowError> {
        let run = WorkflowRun::new(workflow, context, events, &self.config);

        info!(
            "Executing {} workflow {} ({} steps)",
            request.kind(),
            workflow.workflow_id,
            workflow.steps.len()
        );
        self.conversation_logger.log(TranscriptEntry::new(
            "workflow_started",
            json!({
                "workflow_id": workflow.workflow_id,
                "request": request.kind(),
                "session_id": workflow.context.session_id,
                "steps": workflow.steps.iter().map(|s| s.step_id.as_str()).collect::<Vec<_>>(),
            }),
        ));

        for step in workflow.steps_of(StepKind::Prompt) {
            if let Err(source) = self.run_step(&run, step).await {
                return Err(self.fail_workflow(&run, step, source));
            }
        }
        self.run_stage(&run, StepKind::Mapping).await;
        self.run_stage(&run, StepKind::Synthesis).await;

        let outputs = run.collect_outputs();
        let result = WorkflowResult {
            workflow_id: workflow.workflow_id.clone(),
            session_id: workflow.context.session_id.clone(),
            thread_id: workflow.context.thread_id.clone(),
            user_turn_id: workflow.context.target_user_turn_id.clone(),
            user_message: workflow.context.user_message.clone(),
            outputs: outputs.clone(),
        };

        let persisted = self.persister.persist(request, context, &result).await;
        match &persisted {
            Ok(receipt) => {
                self.conversation_logger.log(TranscriptEntry::new(
                    "workflow_persisted",
                    json!({
                        "workflow_id": workflow.workflow_id,
                        "session_id": receipt.session_id,
                        "user_turn_id": receipt.user_turn_id,
                        "ai_turn_id": receipt.ai_turn_id,
                    }),
                ));
                if !request.is_recompute()
                    && let (Some(user_turn_id), Some(ai_turn_id)) =
                        (&receipt.user_turn_id, &receipt.ai_turn_id)
                {
                    events.emit(WorkflowEvent::TurnFinalized {
                        session_id: receipt.session_id.clone(),
                        user_turn_id: user_turn_id.clone(),
                        ai_turn_id: ai_turn_id.clone(),
                    });
                }
            }
            Err(e) => error!("Failed to persist workflow {}: {}", workflow.workflow_id, e),
        }

        events.emit(WorkflowEvent::WorkflowComplete {
            workflow_id: workflow.workflow_id.clone(),
            session_id: workflow.context.session_id.clone(),
            outputs: outputs.clone(),
        });
        run.clear_deltas();

        let (step_results, step_errors) = run.into_parts();
        Ok(WorkflowOutcome {
            workflow_id: workflow.workflow_id.clone(),
            session_id: workflow.context.session_id.clone(),
            user_turn_id: workflow.context.target_user_turn_id.clone(),
            outputs,
            step_results,
            step_errors,
            persisted,
        })
    }

    /// Run every step of one stage, concurrently unless configured otherwise.
    async fn run_stage(&self, run: &WorkflowRun<'_>, kind: StepKind) {
        let steps: Vec<&WorkflowStep> = run.workflow.steps_of(kind).collect();
        if steps.is_empty() {
            return;
        }
        debug!("Running {} {} step(s)", steps.len(), kind);

        if self.config.concurrent_stage_steps {
            join_all(steps.into_iter().map(|step| self.run_step(run, step))).await;
        } else {
            for step in steps {
                let _ = self.run_step(run, step).await;
            }
        }
    }

    /// Run one step and record its outcome. Errors are recorded, then returned
    /// so the caller can decide whether they are fatal.
    async fn run_step(&self, run: &WorkflowRun<'_>, step: &WorkflowStep) -> Result<(), StepError> {
        let hidden = matches!(&step.payload, StepPayload::Prompt(p) if p.hidden);
        run.events.emit(WorkflowEvent::StepUpdate {
            step_id: step.step_id.clone(),
            kind: step.kind(),
            status: StepStatus::Started,
            hidden,
            result: None,
            error: None,
        });

        let outcome = match &step.payload {
            StepPayload::Prompt(p) => self.run_prompt(run, &step.step_id, p).await,
            StepPayload::Mapping(p) => self.run_mapping(run, &step.step_id, p).await,
            StepPayload::Synthesis(p) => self.run_synthesis(run, &step.step_id, p).await,
        };

        match outcome {
            Ok(result) => {
                debug!("Step {} completed", step.step_id);
                self.conversation_logger.log(TranscriptEntry::new(
                    "step_completed",
                    json!({
                        "workflow_id": run.workflow.workflow_id,
                        "step_id": step.step_id,
                        "kind": step.kind(),
                        "result": result,
                    }),
                ));
                run.events.emit(WorkflowEvent::StepUpdate {
                    step_id: step.step_id.clone(),
                    kind: step.kind(),
                    status: StepStatus::Completed,
                    hidden,
                    result: Some(result.clone()),
                    error: None,
                });
                run.record_result(&step.step_id, result);
                Ok(())
            }
            Err(e) => {
                warn!("Step {} failed: {}", step.step_id, e);
                self.conversation_logger.log(TranscriptEntry::new(
                    "step_failed",
                    json!({
                        "workflow_id": run.workflow.workflow_id,
                        "step_id": step.step_id,
                        "kind": step.kind(),
                        "error": e.to_string(),
                    }),
                ));
                run.events.emit(WorkflowEvent::StepUpdate {
                    step_id: step.step_id.clone(),
                    kind: step.kind(),
                    status: StepStatus::Failed,
                    hidden,
                    result: None,
                    error: Some(e.to_string()),
                });
                run.record_error(&step.step_id, e.clone());
                Err(e)
            }
        }
    }

    fn fail_workflow(
        &self,
        run: &WorkflowRun<'_>,
        step: &WorkflowStep,
        source: StepError,
    ) -> ExecuteWorkflowError {
        let err = ExecuteWorkflowError::PromptFailed {
            step_id: step.step_id.clone(),
            source,
        };
        error!("Workflow {} failed: {}", run.workflow.workflow_id, err);
        run.events.emit(WorkflowEvent::WorkflowFailed {
            workflow_id: run.workflow.workflow_id.clone(),
            session_id: run.workflow.context.session_id.clone(),
            error: err.to_string(),
        });
        run.clear_deltas();
        err
    }

    // ==================== Steps ====================

    async fn run_prompt(
        &self,
        run: &WorkflowRun<'_>,
        step_id: &StepId,
        payload: &PromptPayload,
    ) -> Result<StepResult, StepError> {
        run.begin_streaming(&payload.providers);

        let request = FanoutRequest {
            prompt: payload.prompt.clone(),
            providers: payload.providers.clone(),
            session_id: run.workflow.context.session_id.clone(),
            use_thinking: payload.use_thinking,
            provider_contexts: payload.provider_contexts.clone().unwrap_or_default(),
            provider_meta: payload.provider_meta.clone(),
        };
        let observer = StepStreamObserver { run, step_id };
        let FanoutOutcome {
            mut results,
            errors,
        } = self
            .orchestrator
            .execute_parallel_fanout(request, &observer)
            .await;

        let mut batch = BatchStepResult::default();
        for provider in &payload.providers {
            let output = match (results.remove(provider), errors.get(provider)) {
                (Some(r), _) => {
                    let output = ProviderOutput::completed(provider.as_str(), r.text, r.meta);
                    match r.soft_error {
                        Some(e) => {
                            warn!("{}", e);
                            output.with_soft_error(e.message())
                        }
                        None => output,
                    }
                }
                (None, Some(e)) => {
                    warn!("Provider {} failed: {}", provider, e.message());
                    ProviderOutput::failed(provider.as_str(), e.message())
                }
                (None, None) => ProviderOutput::failed(provider.as_str(), "no response"),
            };
            batch.outputs.insert(provider.clone(), output);
        }

        if !batch.has_usable() {
            return Err(StepError::AllProvidersFailed(step_id.to_string()));
        }
        for output in batch.usable() {
            run.cache_context(output);
        }
        Ok(StepResult::Batch(batch))
    }

    async fn run_mapping(
        &self,
        run: &WorkflowRun<'_>,
        step_id: &StepId,
        payload: &MappingPayload,
    ) -> Result<StepResult, StepError> {
        let source = self.source_outputs(run, &payload.source).await?;
        let answers: Vec<(&str, &str)> = source
            .usable()
            .map(|o| (o.provider_id.as_str(), o.text.as_str()))
            .collect();
        if answers.is_empty() {
            return Err(StepError::NoSourceOutputs(step_id.to_string()));
        }

        let prompt = PromptTemplate::mapping_prompt(&payload.original_prompt, &answers);
        let output = self
            .run_single(
                run,
                step_id,
                &payload.mapping_provider,
                prompt,
                payload.use_thinking,
            )
            .await?;
        Ok(StepResult::Single(SingleProviderStepResult { output }))
    }

    async fn run_synthesis(
        &self,
        run: &WorkflowRun<'_>,
        step_id: &StepId,
        payload: &SynthesisPayload,
    ) -> Result<StepResult, StepError> {
        let conflict_map = match &payload.mapping_step_id {
            Some(mapping_id) => Some(
                run.mapping_text(mapping_id)
                    .ok_or_else(|| StepError::MissingMap(mapping_id.to_string()))?,
            ),
            None => None,
        };

        let source = self.source_outputs(run, &payload.source).await?;
        if !source.has_usable() {
            return Err(StepError::NoSourceOutputs(step_id.to_string()));
        }
        let siblings: Vec<(&str, &str)> = source
            .usable()
            .filter(|o| o.provider_id != payload.synthesis_provider)
            .map(|o| (o.provider_id.as_str(), o.text.as_str()))
            .collect();
        if siblings.is_empty() {
            return Err(StepError::NoSiblingOutputs(
                payload.synthesis_provider.clone(),
            ));
        }

        let prompt = PromptTemplate::synthesis_prompt(
            &payload.original_prompt,
            &siblings,
            conflict_map.as_deref(),
        );
        let output = self
            .run_single(
                run,
                step_id,
                &payload.synthesis_provider,
                prompt,
                payload.use_thinking,
            )
            .await?;
        Ok(StepResult::Single(SingleProviderStepResult { output }))
    }

    /// Fan out to a single provider, continuing its prior exchange if one is known.
    async fn run_single(
        &self,
        run: &WorkflowRun<'_>,
        step_id: &StepId,
        provider: &str,
        prompt: String,
        use_thinking: bool,
    ) -> Result<ProviderOutput, StepError> {
        let providers = vec![provider.to_string()];
        run.begin_streaming(&providers);

        let mut provider_contexts = ProviderContexts::new();
        if let Some(meta) = self.provider_context(run, provider).await {
            provider_contexts.insert(provider, meta);
        }

        let request = FanoutRequest {
            prompt,
            providers,
            session_id: run.workflow.context.session_id.clone(),
            use_thinking,
            provider_contexts,
            provider_meta: BTreeMap::new(),
        };
        let observer = StepStreamObserver { run, step_id };
        let FanoutOutcome {
            mut results,
            mut errors,
        } = self
            .orchestrator
            .execute_parallel_fanout(request, &observer)
            .await;

        if let Some(r) = results.remove(provider) {
            if r.text.trim().is_empty() {
                return Err(ProviderError::hard(provider, "empty response").into());
            }
            let mut output = ProviderOutput::completed(provider, r.text, r.meta);
            if let Some(e) = r.soft_error {
                warn!("{}", e);
                output = output.with_soft_error(e.message());
            }
            run.cache_context(&output);
            return Ok(output);
        }
        Err(errors
            .remove(provider)
            .unwrap_or_else(|| ProviderError::hard(provider, "no response"))
            .into())
    }

    // ==================== Inputs ====================

    /// Batch outputs a mapping or synthesis step reads from.
    async fn source_outputs(
        &self,
        run: &WorkflowRun<'_>,
        source: &StepSource,
    ) -> Result<BatchStepResult, StepError> {
        match source {
            StepSource::Step { step_id } => run
                .batch_result(step_id)
                .ok_or_else(|| StepError::NoSourceOutputs(step_id.to_string())),
            StepSource::Historical { turn_id, .. } => {
                if let Some(seeded) = run.seeded_batch(turn_id) {
                    return Ok(seeded.clone());
                }
                let rows = self
                    .store
                    .responses_for_turn(turn_id)
                    .await
                    .map_err(|e| StepError::SourceUnavailable(e.to_string()))?;
                Ok(BatchStepResult::from_frozen(&freeze_batch_outputs(&rows)))
            }
        }
    }

    /// Continuation metadata for a provider, earlier tiers first:
    /// 1. contexts produced in this execution, or the recompute source turn's
    ///    contexts it was seeded with
    /// 2. frozen batch meta of the recompute source turn
    /// 3. the session's last persisted mainline turn
    async fn provider_context(&self, run: &WorkflowRun<'_>, provider: &str) -> Option<Value> {
        if let Some(meta) = run.cached_context(provider) {
            return Some(meta);
        }

        if let ResolvedContext::Recompute(ctx) = run.context {
            if let Some(meta) = run
                .seeded_batch(&ctx.source_turn_id)
                .and_then(|b| b.outputs.get(provider))
                .and_then(|o| o.context_meta())
            {
                return Some(meta.clone());
            }
        }

        if run.workflow.context.session_created {
            return None;
        }
        self.persisted_context(&run.workflow.context.session_id, provider)
            .await
    }

    async fn persisted_context(&self, session_id: &str, provider: &str) -> Option<Value> {
        let lookup = async {
            let Some(last_turn_id) = self
                .store
                .get_session(session_id)
                .await?
                .and_then(|s| s.last_turn_id)
            else {
                return Ok(None);
            };
            let contexts = self
                .store
                .get_turn(&last_turn_id)
                .await?
                .and_then(|t| t.into_ai())
                .map(|ai| ai.provider_contexts.normalize());
            Ok::<_, StoreError>(
                contexts.and_then(|c| c.get(provider).cloned()),
            )
        };
        match lookup.await {
            Ok(meta) => meta,
            Err(e) => {
                debug!("Persisted context lookup for {} failed: {}", provider, e);
                None
            }
        }
    }
}

/// Mutable state of one execution.
struct WorkflowRun<'a> {
    workflow: &'a CompiledWorkflow,
    context: &'a ResolvedContext,
    events: &'a dyn WorkflowEventSink,
    deltas: Mutex<DeltaTracker>,
    contexts: Mutex<ProviderContexts>,
    results: Mutex<BTreeMap<StepId, StepResult>>,
    errors: Mutex<BTreeMap<StepId, StepError>>,
    /// Frozen batch of the recompute source turn, keyed by that turn's id.
    seeded: Option<(String, BatchStepResult)>,
}

impl<'a> WorkflowRun<'a> {
    fn new(
        workflow: &'a CompiledWorkflow,
        context: &'a ResolvedContext,
        events: &'a dyn WorkflowEventSink,
        config: &EngineConfig,
    ) -> Self {
        let mut results = BTreeMap::new();
        let mut contexts = ProviderContexts::new();
        let mut seeded = None;

        if let ResolvedContext::Recompute(ctx) = context {
            let batch = BatchStepResult::from_frozen(&ctx.frozen_batch_outputs);
            results.insert(
                StepId::new(format!("historical-{}", ctx.source_turn_id)),
                StepResult::Batch(batch.clone()),
            );
            contexts = ctx.provider_contexts_at_source_turn.clone();
            seeded = Some((ctx.source_turn_id.clone(), batch));
        }

        Self {
            workflow,
            context,
            events,
            deltas: Mutex::new(DeltaTracker::new(config.streaming.clone())),
            contexts: Mutex::new(contexts),
            results: Mutex::new(results),
            errors: Mutex::new(BTreeMap::new()),
            seeded,
        }
    }

    /// A provider's new stream must not diff against its previous step's text.
    fn begin_streaming(&self, providers: &[String]) {
        if let Ok(mut deltas) = self.deltas.lock() {
            for provider in providers {
                deltas.forget(&delta_key(&self.workflow.context.session_id, provider));
            }
        }
    }

    fn clear_deltas(&self) {
        if let Ok(mut deltas) = self.deltas.lock() {
            deltas.clear();
        }
    }

    fn on_partial(&self, step_id: &StepId, provider_id: &str, chunk: &PartialChunk) {
        let key = delta_key(&self.workflow.context.session_id, provider_id);
        let delta = match self.deltas.lock() {
            Ok(mut deltas) => deltas.make_delta(&key, &chunk.text),
            Err(_) => return,
        };
        match delta {
            Delta::Text(delta) => self.events.emit(WorkflowEvent::PartialResult {
                step_id: step_id.clone(),
                provider_id: provider_id.to_string(),
                delta,
            }),
            Delta::Absorbed {
                regression,
                report: true,
            } => warn!(
                "Stream for {} regressed by {} bytes in step {}",
                provider_id, regression, step_id
            ),
            Delta::Absorbed { .. } | Delta::Unchanged => {}
        }
    }

    fn cache_context(&self, output: &ProviderOutput) {
        if let (Some(meta), Ok(mut contexts)) = (output.context_meta(), self.contexts.lock()) {
            contexts.insert(output.provider_id.clone(), meta.clone());
        }
    }

    fn cached_context(&self, provider: &str) -> Option<Value> {
        self.contexts
            .lock()
            .ok()
            .and_then(|c| c.get(provider).cloned())
    }

    fn seeded_batch(&self, turn_id: &str) -> Option<&BatchStepResult> {
        self.seeded
            .as_ref()
            .filter(|(id, _)| id == turn_id)
            .map(|(_, batch)| batch)
    }

    fn batch_result(&self, step_id: &StepId) -> Option<BatchStepResult> {
        self.results
            .lock()
            .ok()
            .and_then(|r| r.get(step_id).and_then(|s| s.as_batch().cloned()))
    }

    fn mapping_text(&self, step_id: &StepId) -> Option<String> {
        self.results.lock().ok().and_then(|r| {
            r.get(step_id)
                .and_then(|s| s.as_single())
                .filter(|s| s.output.is_usable())
                .map(|s| s.output.text.clone())
        })
    }

    fn record_result(&self, step_id: &StepId, result: StepResult) {
        if let Ok(mut results) = self.results.lock() {
            results.insert(step_id.clone(), result);
        }
    }

    fn record_error(&self, step_id: &StepId, err: StepError) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.insert(step_id.clone(), err);
        }
    }

    /// Outputs keyed by provider; failed mapping and synthesis steps appear
    /// as failed outputs.
    fn collect_outputs(&self) -> WorkflowOutputs {
        let results = self.results.lock().map(|r| r.clone()).unwrap_or_default();
        let errors = self.errors.lock().map(|e| e.clone()).unwrap_or_default();
        let mut outputs = WorkflowOutputs::default();

        for step in &self.workflow.steps {
            let result = results.get(&step.step_id);
            match &step.payload {
                StepPayload::Prompt(_) => {
                    if let Some(batch) = result.and_then(|r| r.as_batch()) {
                        outputs.batch_outputs.extend(batch.outputs.clone());
                    }
                }
                StepPayload::Mapping(p) => {
                    let output =
                        single_output(result, errors.get(&step.step_id), &p.mapping_provider);
                    outputs
                        .mapping_outputs
                        .insert(p.mapping_provider.clone(), output);
                }
                StepPayload::Synthesis(p) => {
                    let output =
                        single_output(result, errors.get(&step.step_id), &p.synthesis_provider);
                    outputs
                        .synthesis_outputs
                        .insert(p.synthesis_provider.clone(), output);
                }
            }
        }
        outputs
    }

    fn into_parts(self) -> (BTreeMap<StepId, StepResult>, BTreeMap<StepId, StepError>) {
        (
            self.results.into_inner().unwrap_or_default(),
            self.errors.into_inner().unwrap_or_default(),
        )
    }
}

fn single_output(
    result: Option<&StepResult>,
    error: Option<&StepError>,
    provider: &str,
) -> ProviderOutput {
    match (result.and_then(|r| r.as_single()), error) {
        (Some(single), _) => single.output.clone(),
        (None, Some(e)) => ProviderOutput::failed(provider, e.to_string()),
        (None, None) => ProviderOutput::failed(provider, "step did not run"),
    }
}

/// Bridges orchestrator partials of one step into delta events.
struct StepStreamObserver<'r, 'a> {
    run: &'r WorkflowRun<'a>,
    step_id: &'r StepId,
}

impl FanoutObserver for StepStreamObserver<'_, '_> {
    fn on_partial(&self, provider_id: &str, chunk: &PartialChunk) {
        self.run.on_partial(self.step_id, provider_id, chunk);
    }
}
