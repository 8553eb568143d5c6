//! Conversation store port
//!
//! Bounded, targeted reads plus one atomic multi-record write per commit.
//! Nothing in the pipeline scans a whole conversation.

use async_trait::async_trait;
use parley_domain::{ProviderResponse, Session, Thread, Turn};
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A record written by a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreRecord {
    Session(Session),
    Thread(Thread),
    Turn(Turn),
    Response(ProviderResponse),
}

/// Records committed together: either all of them land or none does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    records: Vec<StoreRecord>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_session(&mut self, session: Session) -> &mut Self {
        self.records.push(StoreRecord::Session(session));
        self
    }

    pub fn put_thread(&mut self, thread: Thread) -> &mut Self {
        self.records.push(StoreRecord::Thread(thread));
        self
    }

    pub fn put_turn(&mut self, turn: Turn) -> &mut Self {
        self.records.push(StoreRecord::Turn(turn));
        self
    }

    pub fn put_response(&mut self, response: ProviderResponse) -> &mut Self {
        self.records.push(StoreRecord::Response(response));
        self
    }

    pub fn records(&self) -> &[StoreRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<StoreRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Storage of sessions, turns and provider responses.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError>;

    async fn get_turn(&self, id: &str) -> Result<Option<Turn>, StoreError>;

    /// Turns of one session ordered by creation (indexed lookup).
    async fn turns_for_session(&self, session_id: &str) -> Result<Vec<Turn>, StoreError>;

    /// Responses attached to one AI turn (indexed lookup).
    async fn responses_for_turn(&self, ai_turn_id: &str)
    -> Result<Vec<ProviderResponse>, StoreError>;

    /// Apply every record of the batch atomically.
    ///
    /// Implementations must reject a batch containing a response whose AI
    /// turn exists neither in the store nor in the batch itself.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}
