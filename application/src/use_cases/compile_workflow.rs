//! Compile Workflow use case
//!
//! `(request, resolved context) → CompiledWorkflow`. Pure apart from id
//! minting, which goes through the injected [`IdGenerator`].

use crate::ports::id_generator::IdGenerator;
use parley_domain::{
    CompiledWorkflow, DEFAULT_THREAD_ID, ExtendContext, MappingPayload, PromptPayload,
    RecomputeContext, RecomputeRequest, RecomputeStep, ResolvedContext, ResponseType, StepId,
    StepKind, StepPayload, StepSource, SynthesisPayload, TurnOptions, ValidationError,
    WorkflowContext, WorkflowRequest, WorkflowStep,
};
use std::sync::Arc;
use tracing::debug;

pub struct WorkflowCompiler {
    ids: Arc<dyn IdGenerator>,
}

impl WorkflowCompiler {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    pub fn compile(
        &self,
        request: &WorkflowRequest,
        context: &ResolvedContext,
    ) -> Result<CompiledWorkflow, ValidationError> {
        validate(request, context)?;

        let workflow = match (request, context) {
            (WorkflowRequest::Initialize(r), ResolvedContext::Initialize { .. }) => {
                let session_id = self.ids.new_id("session");
                self.compile_turn(&r.user_message, &r.options, session_id, true, None)
            }
            (WorkflowRequest::Extend(r), ResolvedContext::Extend(ctx)) => self.compile_turn(
                &r.user_message,
                &r.options,
                ctx.session_id.clone(),
                false,
                Some(ctx),
            ),
            (WorkflowRequest::Recompute(r), ResolvedContext::Recompute(ctx)) => {
                self.compile_recompute(r, ctx)
            }
            _ => {
                return Err(ValidationError::ContextMismatch {
                    request: request.kind(),
                    context: context.kind(),
                });
            }
        };

        debug!(
            "Compiled {} workflow {} with {} steps",
            request.kind(),
            workflow.workflow_id,
            workflow.steps.len()
        );
        Ok(workflow)
    }

    fn compile_turn(
        &self,
        user_message: &str,
        options: &TurnOptions,
        session_id: String,
        session_created: bool,
        extend: Option<&ExtendContext>,
    ) -> CompiledWorkflow {
        let mut steps = StepBuilder::new(self.ids.as_ref());

        let source = if options.providers.is_empty() {
            // Validation guarantees a previous turn exists here.
            StepSource::Historical {
                turn_id: extend.map(|c| c.last_turn_id.clone()).unwrap_or_default(),
                response_type: ResponseType::Batch,
            }
        } else {
            let step_id = steps.push(
                StepKind::Prompt,
                StepPayload::Prompt(PromptPayload {
                    prompt: user_message.to_string(),
                    providers: options.providers.clone(),
                    provider_contexts: extend.map(|c| c.provider_contexts.clone()),
                    provider_meta: options.provider_meta.clone(),
                    hidden: options.synthesis_first && options.synthesizer.is_some(),
                    use_thinking: options.use_thinking,
                }),
            );
            StepSource::Step { step_id }
        };

        let mapping_step_id = options.effective_mapper().map(|mapper| {
            steps.push(
                StepKind::Mapping,
                StepPayload::Mapping(MappingPayload {
                    mapping_provider: mapper.to_string(),
                    source: source.clone(),
                    original_prompt: user_message.to_string(),
                    use_thinking: options.use_thinking,
                }),
            )
        });

        if let Some(synthesizer) = &options.synthesizer {
            steps.push(
                StepKind::Synthesis,
                StepPayload::Synthesis(SynthesisPayload {
                    synthesis_provider: synthesizer.clone(),
                    source: source.clone(),
                    mapping_step_id: mapping_step_id.clone(),
                    original_prompt: user_message.to_string(),
                    use_thinking: options.use_thinking,
                }),
            );
        }

        CompiledWorkflow {
            workflow_id: self.ids.new_id("workflow"),
            context: WorkflowContext {
                session_id,
                thread_id: DEFAULT_THREAD_ID.to_string(),
                target_user_turn_id: self.ids.new_id("user"),
                user_message: user_message.to_string(),
                session_created,
            },
            steps: steps.finish(),
        }
    }

    fn compile_recompute(
        &self,
        request: &RecomputeRequest,
        ctx: &RecomputeContext,
    ) -> CompiledWorkflow {
        let message = effective_recompute_message(request, ctx).to_string();
        let source = StepSource::Historical {
            turn_id: ctx.source_turn_id.clone(),
            response_type: ResponseType::Batch,
        };

        let mut steps = StepBuilder::new(self.ids.as_ref());
        match request.step_type {
            RecomputeStep::Mapping => {
                steps.push(
                    StepKind::Mapping,
                    StepPayload::Mapping(MappingPayload {
                        mapping_provider: request.target_provider.clone(),
                        source,
                        original_prompt: message.clone(),
                        use_thinking: request.use_thinking,
                    }),
                );
            }
            RecomputeStep::Synthesis => {
                steps.push(
                    StepKind::Synthesis,
                    StepPayload::Synthesis(SynthesisPayload {
                        synthesis_provider: request.target_provider.clone(),
                        source,
                        mapping_step_id: None,
                        original_prompt: message.clone(),
                        use_thinking: request.use_thinking,
                    }),
                );
            }
        }

        CompiledWorkflow {
            workflow_id: self.ids.new_id("workflow"),
            context: WorkflowContext {
                session_id: ctx.session_id.clone(),
                thread_id: DEFAULT_THREAD_ID.to_string(),
                target_user_turn_id: ctx.source_user_turn_id.clone(),
                user_message: message,
                session_created: false,
            },
            steps: steps.finish(),
        }
    }
}

/// Appends steps with ids `<kind>-<index>-<unique suffix>`.
struct StepBuilder<'a> {
    ids: &'a dyn IdGenerator,
    steps: Vec<WorkflowStep>,
}

impl<'a> StepBuilder<'a> {
    fn new(ids: &'a dyn IdGenerator) -> Self {
        Self {
            ids,
            steps: Vec::new(),
        }
    }

    fn push(&mut self, kind: StepKind, payload: StepPayload) -> StepId {
        let prefix = format!("{}-{}", kind, self.steps.len());
        let step_id = StepId::new(self.ids.new_id(&prefix));
        self.steps.push(WorkflowStep {
            step_id: step_id.clone(),
            payload,
        });
        step_id
    }

    fn finish(self) -> Vec<WorkflowStep> {
        self.steps
    }
}

fn effective_recompute_message<'a>(
    request: &'a RecomputeRequest,
    ctx: &'a RecomputeContext,
) -> &'a str {
    request
        .user_message
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(&ctx.source_user_message)
}

/// Reject malformed requests before any step is built.
fn validate(request: &WorkflowRequest, context: &ResolvedContext) -> Result<(), ValidationError> {
    if request.kind() != context.kind() {
        return Err(ValidationError::ContextMismatch {
            request: request.kind(),
            context: context.kind(),
        });
    }

    match (request, context) {
        (WorkflowRequest::Initialize(r), _) => {
            validate_turn(&r.user_message, &r.options)?;
            if r.options.providers.is_empty() {
                let step = if r.options.synthesizer.is_some() {
                    "synthesis"
                } else {
                    "mapping"
                };
                return Err(ValidationError::NoBatchSource(step));
            }
        }
        (WorkflowRequest::Extend(r), ResolvedContext::Extend(ctx)) => {
            validate_turn(&r.user_message, &r.options)?;
            require("extend", "session_id", &ctx.session_id)?;
            require("extend", "last_turn_id", &ctx.last_turn_id)?;
            check_session(&r.session_id, &ctx.session_id)?;
        }
        (WorkflowRequest::Recompute(r), ResolvedContext::Recompute(ctx)) => {
            require("recompute", "session_id", &ctx.session_id)?;
            require("recompute", "source_turn_id", &ctx.source_turn_id)?;
            if ctx.frozen_batch_outputs.is_empty() {
                return Err(ValidationError::IncompleteContext {
                    context: "recompute",
                    field: "frozen_batch_outputs",
                });
            }
            check_session(&r.session_id, &ctx.session_id)?;
            if r.target_provider.is_empty() {
                return Err(ValidationError::NothingToRun);
            }
            if effective_recompute_message(r, ctx).trim().is_empty() {
                return Err(ValidationError::EmptyMessage);
            }
        }
        _ => {
            return Err(ValidationError::ContextMismatch {
                request: request.kind(),
                context: context.kind(),
            });
        }
    }
    Ok(())
}

fn validate_turn(message: &str, options: &TurnOptions) -> Result<(), ValidationError> {
    if message.trim().is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    if !options.has_work() {
        return Err(ValidationError::NothingToRun);
    }
    Ok(())
}

fn require(context: &'static str, field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::IncompleteContext { context, field })
    } else {
        Ok(())
    }
}

fn check_session(request: &str, resolved: &str) -> Result<(), ValidationError> {
    if request != resolved {
        return Err(ValidationError::SessionMismatch {
            request: request.to_string(),
            resolved: resolved.to_string(),
        });
    }
    Ok(())
}
