//! In-memory conversation store.

use super::tables::ConversationTables;
use async_trait::async_trait;
use parley_application::{ConversationStore, StoreError, WriteBatch};
use parley_domain::{ProviderResponse, Session, Turn};
use std::sync::RwLock;

/// Conversation store kept entirely in memory, for `--ephemeral` runs and tests.
#[derive(Default)]
pub struct InMemoryConversationStore {
    tables: RwLock<ConversationTables>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&ConversationTables) -> T) -> Result<T, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(f(&tables))
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.read(|t| t.session(id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        self.read(|t| t.sessions())
    }

    async fn get_turn(&self, id: &str) -> Result<Option<Turn>, StoreError> {
        self.read(|t| t.turn(id).cloned())
    }

    async fn turns_for_session(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        self.read(|t| t.turns_for_session(session_id))
    }

    async fn responses_for_turn(
        &self,
        ai_turn_id: &str,
    ) -> Result<Vec<ProviderResponse>, StoreError> {
        self.read(|t| t.responses_for_turn(ai_turn_id))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        tables.apply(batch)
    }
}
