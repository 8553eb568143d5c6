//! Resolve Context use case
//!
//! Turns a primitive request into the minimal [`ResolvedContext`] the compiler
//! and engine need. Every read is a targeted lookup; the cost of resolving
//! never grows with the length of the conversation.

use crate::ports::conversation_store::{ConversationStore, StoreError};
use parley_domain::{
    AiTurn, ContextError, ExtendContext, ExtendRequest, FrozenOutput, ProviderResponse,
    RecomputeContext, RecomputeRequest, ResolvedContext, ResponseType, WorkflowRequest,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

impl From<StoreError> for ContextError {
    fn from(err: StoreError) -> Self {
        ContextError::Storage(err.to_string())
    }
}

pub struct ContextResolver {
    store: Arc<dyn ConversationStore>,
}

impl ContextResolver {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, request: &WorkflowRequest) -> Result<ResolvedContext, ContextError> {
        match request {
            WorkflowRequest::Initialize(r) => Ok(ResolvedContext::Initialize {
                providers: r.options.providers.clone(),
            }),
            WorkflowRequest::Extend(r) => self.resolve_extend(r).await.map(ResolvedContext::Extend),
            WorkflowRequest::Recompute(r) => self
                .resolve_recompute(r)
                .await
                .map(ResolvedContext::Recompute),
        }
    }

    /// One session read plus one turn read.
    async fn resolve_extend(&self, request: &ExtendRequest) -> Result<ExtendContext, ContextError> {
        if request.session_id.is_empty() {
            return Err(ContextError::MissingField {
                primitive: "extend",
                field: "session_id",
            });
        }

        let session = self
            .store
            .get_session(&request.session_id)
            .await?
            .ok_or_else(|| ContextError::SessionNotFound(request.session_id.clone()))?;
        let last_turn_id = session
            .last_turn_id
            .ok_or_else(|| ContextError::NoLastTurn(request.session_id.clone()))?;
        let last_turn = self.load_ai_turn(&last_turn_id).await?;

        let continuing = request
            .options
            .providers
            .iter()
            .filter(|p| !request.reset_providers.contains(p))
            .map(String::as_str);
        let provider_contexts = last_turn
            .provider_contexts
            .normalize()
            .filtered_to(continuing);

        debug!(
            "Resolved extend context for session {} ({} continuing providers)",
            request.session_id,
            provider_contexts.len()
        );

        Ok(ExtendContext {
            session_id: request.session_id.clone(),
            last_turn_id,
            provider_contexts,
        })
    }

    async fn resolve_recompute(
        &self,
        request: &RecomputeRequest,
    ) -> Result<RecomputeContext, ContextError> {
        for (value, field) in [
            (&request.session_id, "session_id"),
            (&request.source_turn_id, "source_turn_id"),
            (&request.target_provider, "target_provider"),
        ] {
            if value.is_empty() {
                return Err(ContextError::MissingField {
                    primitive: "recompute",
                    field,
                });
            }
        }

        let source = self.load_ai_turn(&request.source_turn_id).await?;
        if source.session_id != request.session_id {
            return Err(ContextError::SessionMismatch {
                session_id: request.session_id.clone(),
                turn_id: source.id,
            });
        }

        let responses = self.store.responses_for_turn(&source.id).await?;
        let frozen_batch_outputs = freeze_batch_outputs(&responses);
        if frozen_batch_outputs.is_empty() {
            return Err(ContextError::NoBatchOutputs(source.id));
        }

        let source_user_message = match request
            .user_message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
        {
            Some(message) => message.to_string(),
            None => self.load_user_message(&source.user_turn_id).await?,
        };

        debug!(
            "Resolved recompute context for turn {} ({} frozen batch outputs)",
            source.id,
            frozen_batch_outputs.len()
        );

        Ok(RecomputeContext {
            session_id: request.session_id.clone(),
            source_turn_id: source.id,
            source_user_turn_id: source.user_turn_id,
            frozen_batch_outputs,
            provider_contexts_at_source_turn: source.provider_contexts.normalize(),
            step_type: request.step_type,
            target_provider: request.target_provider.clone(),
            source_user_message,
        })
    }

    async fn load_ai_turn(&self, turn_id: &str) -> Result<AiTurn, ContextError> {
        self.store
            .get_turn(turn_id)
            .await?
            .ok_or_else(|| ContextError::TurnNotFound(turn_id.to_string()))?
            .into_ai()
            .ok_or_else(|| ContextError::NotAnAiTurn(turn_id.to_string()))
    }

    async fn load_user_message(&self, user_turn_id: &str) -> Result<String, ContextError> {
        self.store
            .get_turn(user_turn_id)
            .await?
            .and_then(|turn| turn.as_user().map(|u| u.content.clone()))
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ContextError::UserMessageNotFound(user_turn_id.to_string()))
    }
}

/// Reduce a turn's batch rows to one snapshot per provider.
///
/// A provider's best row wins by status (`completed` > `streaming` >
/// `pending`), then by most recent update. Failed and empty rows never freeze.
pub fn freeze_batch_outputs(responses: &[ProviderResponse]) -> BTreeMap<String, FrozenOutput> {
    let mut best: BTreeMap<String, &ProviderResponse> = BTreeMap::new();
    for response in responses
        .iter()
        .filter(|r| r.response_type == ResponseType::Batch && r.is_usable())
    {
        let replace = best.get(&response.provider_id).is_none_or(|current| {
            (response.status.preference(), response.updated_at)
                > (current.status.preference(), current.updated_at)
        });
        if replace {
            best.insert(response.provider_id.clone(), response);
        }
    }

    best.into_iter()
        .map(|(provider, r)| {
            (
                provider.clone(),
                FrozenOutput {
                    provider_id: provider,
                    text: r.text.clone(),
                    status: r.status,
                    meta: r.meta.clone(),
                    updated_at: r.updated_at,
                },
            )
        })
        .collect()
}
