//! Persist Turn use case
//!
//! Turn-scoped writer with one handler per primitive. Every call ends in
//! exactly one atomic [`ConversationStore::commit`].
//!
//! | Primitive  | Session record            | Turns                    | Rows            |
//! |------------|---------------------------|--------------------------|-----------------|
//! | initialize | created, `turn_count = 2` | user `0`, AI `1`         | every output    |
//! | extend     | pointer advanced by 2     | user `n`, AI `n + 1`     | every output    |
//! | recompute  | not written               | AI `-1` (branch)         | exactly one     |

use crate::ports::conversation_store::{ConversationStore, StoreError, WriteBatch};
use crate::ports::id_generator::IdGenerator;
use chrono::{DateTime, Utc};
use parley_domain::util::ellipsize;
use parley_domain::{
    AiTurn, AiTurnMeta, BRANCH_SEQUENCE, ExtendContext, PersistenceError, ProviderContexts,
    ProviderOutput, ProviderResponse, RecomputeContext, ResolvedContext, ResponseType, Session,
    Thread, Turn, UserTurn, WorkflowOutputs, WorkflowRequest, WorkflowResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const TITLE_MAX_BYTES: usize = 60;

impl From<StoreError> for PersistenceError {
    fn from(err: StoreError) -> Self {
        PersistenceError::Storage(err.to_string())
    }
}

/// Canonical identifiers of what was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistReceipt {
    pub session_id: String,
    /// Absent for recompute, which reuses the source turn's user turn.
    pub user_turn_id: Option<String>,
    pub ai_turn_id: Option<String>,
}

pub struct TurnPersister {
    store: Arc<dyn ConversationStore>,
    ids: Arc<dyn IdGenerator>,
}

impl TurnPersister {
    pub fn new(store: Arc<dyn ConversationStore>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, ids }
    }

    pub async fn persist(
        &self,
        request: &WorkflowRequest,
        context: &ResolvedContext,
        result: &WorkflowResult,
    ) -> Result<PersistReceipt, PersistenceError> {
        match (request, context) {
            (WorkflowRequest::Initialize(_), ResolvedContext::Initialize { .. }) => {
                self.persist_initialize(result).await
            }
            (WorkflowRequest::Extend(_), ResolvedContext::Extend(ctx)) => {
                self.persist_extend(ctx, result).await
            }
            (WorkflowRequest::Recompute(_), ResolvedContext::Recompute(ctx)) => {
                self.persist_recompute(ctx, result).await
            }
            _ => Err(PersistenceError::ContextMismatch {
                request: request.kind(),
                context: context.kind(),
            }),
        }
    }

    async fn persist_initialize(
        &self,
        result: &WorkflowResult,
    ) -> Result<PersistReceipt, PersistenceError> {
        let now = Utc::now();
        let ai_turn_id = self.ids.new_id("ai");
        let rows = response_rows(&result.session_id, &ai_turn_id, &result.outputs, now);

        let session = Session {
            id: result.session_id.clone(),
            title: session_title(&result.user_message),
            created_at: now,
            last_activity: now,
            turn_count: 2,
            last_turn_id: Some(ai_turn_id.clone()),
        };
        let thread = Thread {
            id: result.thread_id.clone(),
            session_id: result.session_id.clone(),
            title: "Main".to_string(),
            is_active: true,
            created_at: now,
        };
        let user_turn = user_turn(result, 0, now);
        let ai_turn = AiTurn {
            provider_contexts: result.outputs.harvested_contexts(),
            ..ai_turn(result, &ai_turn_id, &user_turn.id, 1, &rows, now)
        };

        let mut batch = WriteBatch::new();
        batch
            .put_session(session)
            .put_thread(thread)
            .put_turn(Turn::User(user_turn))
            .put_turn(Turn::Ai(ai_turn));
        for row in rows {
            batch.put_response(row);
        }
        self.store.commit(batch).await?;

        info!(
            "Persisted new session {} (AI turn {})",
            result.session_id, ai_turn_id
        );
        Ok(PersistReceipt {
            session_id: result.session_id.clone(),
            user_turn_id: Some(result.user_turn_id.clone()),
            ai_turn_id: Some(ai_turn_id),
        })
    }

    async fn persist_extend(
        &self,
        ctx: &ExtendContext,
        result: &WorkflowResult,
    ) -> Result<PersistReceipt, PersistenceError> {
        let mut session = self
            .store
            .get_session(&ctx.session_id)
            .await?
            .ok_or_else(|| PersistenceError::SessionNotFound(ctx.session_id.clone()))?;
        let previous = self
            .store
            .get_turn(&ctx.last_turn_id)
            .await?
            .ok_or_else(|| PersistenceError::TurnNotFound(ctx.last_turn_id.clone()))?
            .into_ai()
            .ok_or_else(|| PersistenceError::NotAnAiTurn(ctx.last_turn_id.clone()))?;

        let now = Utc::now();
        let ai_turn_id = self.ids.new_id("ai");
        let rows = response_rows(&ctx.session_id, &ai_turn_id, &result.outputs, now);
        let user_sequence = session.next_sequence();

        let user_turn = user_turn(result, user_sequence, now);
        let ai_turn = AiTurn {
            provider_contexts: previous
                .provider_contexts
                .normalize()
                .merged_with(&result.outputs.harvested_contexts()),
            ..ai_turn(result, &ai_turn_id, &user_turn.id, user_sequence + 1, &rows, now)
        };

        session.turn_count += 2;
        session.last_turn_id = Some(ai_turn_id.clone());
        session.last_activity = now;

        let mut batch = WriteBatch::new();
        batch
            .put_session(session)
            .put_turn(Turn::User(user_turn))
            .put_turn(Turn::Ai(ai_turn));
        for row in rows {
            batch.put_response(row);
        }
        self.store.commit(batch).await?;

        info!(
            "Extended session {} (AI turn {} at sequence {})",
            ctx.session_id,
            ai_turn_id,
            user_sequence + 1
        );
        Ok(PersistReceipt {
            session_id: ctx.session_id.clone(),
            user_turn_id: Some(result.user_turn_id.clone()),
            ai_turn_id: Some(ai_turn_id),
        })
    }

    async fn persist_recompute(
        &self,
        ctx: &RecomputeContext,
        result: &WorkflowResult,
    ) -> Result<PersistReceipt, PersistenceError> {
        let response_type = ctx.step_type.response_type();
        let output = result
            .outputs
            .outputs_of(response_type)
            .get(&ctx.target_provider)
            .ok_or_else(|| {
                PersistenceError::Storage(format!(
                    "no {} output from {} to persist",
                    response_type, ctx.target_provider
                ))
            })?;

        let now = Utc::now();
        let ai_turn_id = self.ids.new_id("ai");
        let row = response_row(&ctx.session_id, &ai_turn_id, response_type, output, now);

        let ai_turn = AiTurn {
            provider_contexts: ctx.provider_contexts_at_source_turn.clone(),
            meta: AiTurnMeta {
                is_historical_rerun: true,
                source_turn_id: Some(ctx.source_turn_id.clone()),
                recomputed_step: Some(response_type),
            },
            ..ai_turn(
                result,
                &ai_turn_id,
                &ctx.source_user_turn_id,
                BRANCH_SEQUENCE,
                std::slice::from_ref(&row),
                now,
            )
        };

        let mut batch = WriteBatch::new();
        batch.put_turn(Turn::Ai(ai_turn)).put_response(row);
        self.store.commit(batch).await?;

        debug!(
            "Persisted recompute branch {} of turn {}",
            ai_turn_id, ctx.source_turn_id
        );
        Ok(PersistReceipt {
            session_id: ctx.session_id.clone(),
            user_turn_id: None,
            ai_turn_id: Some(ai_turn_id),
        })
    }
}

fn session_title(message: &str) -> String {
    ellipsize(message, TITLE_MAX_BYTES)
}

fn user_turn(result: &WorkflowResult, sequence: i64, now: DateTime<Utc>) -> UserTurn {
    UserTurn {
        id: result.user_turn_id.clone(),
        session_id: result.session_id.clone(),
        thread_id: result.thread_id.clone(),
        content: result.user_message.clone(),
        sequence,
        created_at: now,
    }
}

fn ai_turn(
    result: &WorkflowResult,
    ai_turn_id: &str,
    user_turn_id: &str,
    sequence: i64,
    rows: &[ProviderResponse],
    now: DateTime<Utc>,
) -> AiTurn {
    let count = |t: ResponseType| rows.iter().filter(|r| r.response_type == t).count() as u32;
    AiTurn {
        id: ai_turn_id.to_string(),
        user_turn_id: user_turn_id.to_string(),
        session_id: result.session_id.clone(),
        thread_id: result.thread_id.clone(),
        created_at: now,
        provider_contexts: ProviderContexts::new(),
        sequence,
        batch_response_count: count(ResponseType::Batch),
        mapping_response_count: count(ResponseType::Mapping),
        synthesis_response_count: count(ResponseType::Synthesis),
        meta: AiTurnMeta::default(),
    }
}

fn response_rows(
    session_id: &str,
    ai_turn_id: &str,
    outputs: &WorkflowOutputs,
    now: DateTime<Utc>,
) -> Vec<ProviderResponse> {
    outputs
        .iter_all()
        .map(|(response_type, output)| {
            response_row(session_id, ai_turn_id, response_type, output, now)
        })
        .collect()
}

fn response_row(
    session_id: &str,
    ai_turn_id: &str,
    response_type: ResponseType,
    output: &ProviderOutput,
    now: DateTime<Utc>,
) -> ProviderResponse {
    ProviderResponse {
        id: ProviderResponse::key_id(ai_turn_id, &output.provider_id, response_type, 0),
        session_id: session_id.to_string(),
        ai_turn_id: ai_turn_id.to_string(),
        provider_id: output.provider_id.clone(),
        response_type,
        response_index: 0,
        text: output.text.clone(),
        status: output.status,
        meta: output.meta.clone(),
        error: output.error.clone().or_else(|| output.soft_error.clone()),
        created_at: now,
        updated_at: now,
    }
}
