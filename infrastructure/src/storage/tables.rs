//! Indexed conversation tables shared by the store adapters.

use parley_application::{StoreError, StoreRecord, WriteBatch};
use parley_domain::{ProviderResponse, Session, Thread, Turn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// All conversation records plus the secondary indexes used by the
/// targeted reads.
///
/// Only the primary maps are serialized; indexes are rebuilt on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationTables {
    sessions: BTreeMap<String, Session>,
    threads: BTreeMap<String, Thread>,
    turns: BTreeMap<String, Turn>,
    responses: BTreeMap<String, ProviderResponse>,
    #[serde(skip)]
    turns_by_session: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    responses_by_turn: BTreeMap<String, Vec<String>>,
}

impl ConversationTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the secondary indexes after deserialization.
    pub fn reindex(mut self) -> Self {
        self.turns_by_session.clear();
        self.responses_by_turn.clear();

        let mut turns: Vec<&Turn> = self.turns.values().collect();
        turns.sort_by_key(|t| (created_at(t), t.sequence()));
        for turn in turns {
            self.turns_by_session
                .entry(turn.session_id().to_string())
                .or_default()
                .push(turn.id().to_string());
        }
        for response in self.responses.values() {
            self.responses_by_turn
                .entry(response.ai_turn_id.clone())
                .or_default()
                .push(response.id.clone());
        }
        self
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        sessions
    }

    pub fn turn(&self, id: &str) -> Option<&Turn> {
        self.turns.get(id)
    }

    pub fn turns_for_session(&self, session_id: &str) -> Vec<Turn> {
        self.turns_by_session
            .get(session_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.turns.get(id).cloned())
            .collect()
    }

    pub fn responses_for_turn(&self, ai_turn_id: &str) -> Vec<ProviderResponse> {
        self.responses_by_turn
            .get(ai_turn_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.responses.get(id).cloned())
            .collect()
    }

    /// Check the batch against the current tables without applying it.
    pub fn validate(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let batch_ai_turns: HashSet<&str> = batch
            .records()
            .iter()
            .filter_map(|r| match r {
                StoreRecord::Turn(Turn::Ai(ai)) => Some(ai.id.as_str()),
                _ => None,
            })
            .collect();

        for record in batch.records() {
            if let StoreRecord::Response(response) = record {
                let known = batch_ai_turns.contains(response.ai_turn_id.as_str())
                    || matches!(self.turns.get(&response.ai_turn_id), Some(Turn::Ai(_)));
                if !known {
                    return Err(StoreError::Integrity(format!(
                        "response {} references unknown AI turn {}",
                        response.id, response.ai_turn_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate then upsert every record of the batch. On error nothing
    /// is applied.
    pub fn apply(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        self.validate(&batch)?;
        for record in batch.into_records() {
            match record {
                StoreRecord::Session(session) => {
                    self.sessions.insert(session.id.clone(), session);
                }
                StoreRecord::Thread(thread) => {
                    self.threads.insert(thread.id.clone(), thread);
                }
                StoreRecord::Turn(turn) => {
                    let id = turn.id().to_string();
                    if !self.turns.contains_key(&id) {
                        self.turns_by_session
                            .entry(turn.session_id().to_string())
                            .or_default()
                            .push(id.clone());
                    }
                    self.turns.insert(id, turn);
                }
                StoreRecord::Response(response) => {
                    if !self.responses.contains_key(&response.id) {
                        self.responses_by_turn
                            .entry(response.ai_turn_id.clone())
                            .or_default()
                            .push(response.id.clone());
                    }
                    self.responses.insert(response.id.clone(), response);
                }
            }
        }
        Ok(())
    }
}

fn created_at(turn: &Turn) -> chrono::DateTime<chrono::Utc> {
    match turn {
        Turn::User(u) => u.created_at,
        Turn::Ai(a) => a.created_at,
    }
}
