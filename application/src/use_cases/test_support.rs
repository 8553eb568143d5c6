//! In-test fakes for the application ports.

use crate::ports::conversation_store::{ConversationStore, StoreError, StoreRecord, WriteBatch};
use crate::ports::orchestrator::{
    FanoutObserver, FanoutOutcome, FanoutRequest, FanoutResult, Orchestrator, PartialChunk,
};
use crate::ports::workflow_events::WorkflowEventSink;
use async_trait::async_trait;
use parley_domain::{
    AiTurn, AiTurnMeta, DEFAULT_THREAD_ID, ProviderContexts, ProviderError, ProviderResponse,
    ResponseStatus, ResponseType, Session, Turn, UserTurn, WorkflowEvent,
};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// ==================== Store ====================

#[derive(Default)]
pub struct FakeStore {
    sessions: Mutex<HashMap<String, Session>>,
    turns: Mutex<Vec<Turn>>,
    responses: Mutex<Vec<ProviderResponse>>,
    pub session_reads: AtomicUsize,
    pub turn_reads: AtomicUsize,
    pub response_reads: AtomicUsize,
    pub commits: AtomicUsize,
    pub fail_commits: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_session(&self, session: Session) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    pub fn insert_turn(&self, turn: Turn) {
        self.turns.lock().unwrap().push(turn);
    }

    pub fn insert_response(&self, response: ProviderResponse) {
        self.responses.lock().unwrap().push(response);
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn ai_turn(&self, id: &str) -> Option<AiTurn> {
        self.turns
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id() == id)
            .and_then(|t| t.as_ai().cloned())
    }

    pub fn all_turns(&self) -> Vec<Turn> {
        self.turns.lock().unwrap().clone()
    }

    pub fn all_responses(&self) -> Vec<ProviderResponse> {
        self.responses.lock().unwrap().clone()
    }

    pub fn reset_counters(&self) {
        self.session_reads.store(0, Ordering::SeqCst);
        self.turn_reads.store(0, Ordering::SeqCst);
        self.response_reads.store(0, Ordering::SeqCst);
        self.commits.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConversationStore for FakeStore {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.session_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.session(id))
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        Ok(self.sessions.lock().unwrap().values().cloned().collect())
    }

    async fn get_turn(&self, id: &str) -> Result<Option<Turn>, StoreError> {
        self.turn_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .turns
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id() == id)
            .cloned())
    }

    async fn turns_for_session(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        Ok(self
            .turns
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.session_id() == session_id)
            .cloned()
            .collect())
    }

    async fn responses_for_turn(
        &self,
        ai_turn_id: &str,
    ) -> Result<Vec<ProviderResponse>, StoreError> {
        self.response_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .responses
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.ai_turn_id == ai_turn_id)
            .cloned()
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Io("disk full".to_string()));
        }
        let known: Vec<String> = self
            .turns
            .lock()
            .unwrap()
            .iter()
            .filter_map(|t| t.as_ai().map(|a| a.id.clone()))
            .chain(batch.records().iter().filter_map(|r| match r {
                StoreRecord::Turn(Turn::Ai(a)) => Some(a.id.clone()),
                _ => None,
            }))
            .collect();
        for record in batch.records() {
            if let StoreRecord::Response(r) = record
                && !known.contains(&r.ai_turn_id)
            {
                return Err(StoreError::Integrity(format!(
                    "response {} references unknown AI turn {}",
                    r.id, r.ai_turn_id
                )));
            }
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        for record in batch.into_records() {
            match record {
                StoreRecord::Session(s) => self.insert_session(s),
                StoreRecord::Thread(_) => {}
                StoreRecord::Turn(t) => {
                    let mut turns = self.turns.lock().unwrap();
                    turns.retain(|existing| existing.id() != t.id());
                    turns.push(t);
                }
                StoreRecord::Response(r) => {
                    let mut responses = self.responses.lock().unwrap();
                    responses.retain(|existing| existing.id != r.id);
                    responses.push(r);
                }
            }
        }
        Ok(())
    }
}

// ==================== Orchestrator ====================

/// What one provider does on its next call.
#[derive(Debug, Clone)]
pub enum Script {
    Reply {
        partials: Vec<String>,
        text: String,
        meta: Value,
    },
    Soft {
        text: String,
        message: String,
    },
    Fail(String),
}

impl Script {
    pub fn reply(text: &str) -> Self {
        Script::Reply {
            partials: Vec::new(),
            text: text.to_string(),
            meta: Value::Null,
        }
    }

    pub fn reply_with_meta(text: &str, meta: Value) -> Self {
        Script::Reply {
            partials: Vec::new(),
            text: text.to_string(),
            meta,
        }
    }

    pub fn streamed(partials: &[&str]) -> Self {
        Script::Reply {
            partials: partials.iter().map(|p| p.to_string()).collect(),
            text: partials.last().map(|p| p.to_string()).unwrap_or_default(),
            meta: Value::Null,
        }
    }

    pub fn fail(message: &str) -> Self {
        Script::Fail(message.to_string())
    }
}

/// Orchestrator replaying queued scripts per provider.
///
/// Providers without a queued script answer `"<provider> answer"` with a
/// `{"chat": "<provider>-chat"}` continuation.
#[derive(Default)]
pub struct ScriptedOrchestrator {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    calls: Mutex<Vec<FanoutRequest>>,
}

impl ScriptedOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, provider: &str, script: Script) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(provider.to_string())
            .or_default()
            .push_back(script);
        self
    }

    pub fn calls(&self) -> Vec<FanoutRequest> {
        self.calls.lock().unwrap().clone()
    }

    fn next_script(&self, provider: &str) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(provider)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Script::Reply {
                partials: Vec::new(),
                text: format!("{} answer", provider),
                meta: json!({ "chat": format!("{}-chat", provider) }),
            })
    }
}

#[async_trait]
impl Orchestrator for ScriptedOrchestrator {
    async fn execute_parallel_fanout(
        &self,
        request: FanoutRequest,
        observer: &dyn FanoutObserver,
    ) -> FanoutOutcome {
        self.calls.lock().unwrap().push(request.clone());

        let mut outcome = FanoutOutcome::default();
        for provider in &request.providers {
            match self.next_script(provider) {
                Script::Reply {
                    partials,
                    text,
                    meta,
                } => {
                    for partial in &partials {
                        observer.on_partial(provider, &PartialChunk::new(partial.as_str()));
                    }
                    outcome
                        .results
                        .insert(provider.clone(), FanoutResult::new(text, meta));
                }
                Script::Soft { text, message } => {
                    outcome.results.insert(
                        provider.clone(),
                        FanoutResult::salvaged(text, Value::Null, provider, message),
                    );
                }
                Script::Fail(message) => {
                    outcome
                        .errors
                        .insert(provider.clone(), ProviderError::hard(provider, message));
                }
            }
        }
        outcome
    }
}

// ==================== Events ====================

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl WorkflowEventSink for RecordingSink {
    fn emit(&self, event: WorkflowEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ==================== Fixtures ====================

/// A persisted two-turn session: user turn `user-1`, AI turn `ai-1` with
/// batch rows for each `(provider, text)` pair.
pub fn seed_session(store: &FakeStore, contexts: Value, batch: &[(&str, &str)]) -> Session {
    let now = chrono::Utc::now();
    let session = Session {
        id: "s-1".to_string(),
        title: "seeded".to_string(),
        created_at: now,
        last_activity: now,
        turn_count: 2,
        last_turn_id: Some("ai-1".to_string()),
    };
    store.insert_session(session.clone());
    store.insert_turn(Turn::User(UserTurn {
        id: "user-1".to_string(),
        session_id: "s-1".to_string(),
        thread_id: DEFAULT_THREAD_ID.to_string(),
        content: "What is Rust?".to_string(),
        sequence: 0,
        created_at: now,
    }));
    // Stored as-is so legacy shapes survive until read.
    let contexts: ProviderContexts = serde_json::from_value(contexts).unwrap_or_default();
    store.insert_turn(Turn::Ai(AiTurn {
        id: "ai-1".to_string(),
        user_turn_id: "user-1".to_string(),
        session_id: "s-1".to_string(),
        thread_id: DEFAULT_THREAD_ID.to_string(),
        created_at: now,
        provider_contexts: contexts,
        sequence: 1,
        batch_response_count: batch.len() as u32,
        mapping_response_count: 0,
        synthesis_response_count: 0,
        meta: AiTurnMeta::default(),
    }));
    for (provider, text) in batch {
        store.insert_response(batch_row("ai-1", provider, text, ResponseStatus::Completed));
    }
    session
}

pub fn batch_row(
    ai_turn_id: &str,
    provider: &str,
    text: &str,
    status: ResponseStatus,
) -> ProviderResponse {
    let now = chrono::Utc::now();
    ProviderResponse {
        id: ProviderResponse::key_id(ai_turn_id, provider, ResponseType::Batch, 0),
        session_id: "s-1".to_string(),
        ai_turn_id: ai_turn_id.to_string(),
        provider_id: provider.to_string(),
        response_type: ResponseType::Batch,
        response_index: 0,
        text: text.to_string(),
        status,
        meta: Value::Null,
        error: None,
        created_at: now,
        updated_at: now,
    }
}
