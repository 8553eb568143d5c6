//! JSON file backed conversation store.
//!
//! The whole conversation set lives in one JSON document. A commit applies
//! the batch to a copy of the tables, writes the copy to a temporary file in
//! the same directory and renames it over the store file; the in-memory
//! tables are only swapped once the rename succeeded.

use super::tables::ConversationTables;
use async_trait::async_trait;
use parley_application::{ConversationStore, StoreError, WriteBatch};
use parley_domain::{ProviderResponse, Session, Turn};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

pub struct JsonFileConversationStore {
    path: PathBuf,
    tables: RwLock<ConversationTables>,
}

impl JsonFileConversationStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let tables = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => ConversationTables::new(),
            Ok(content) => serde_json::from_str::<ConversationTables>(&content)
                .map_err(|e| {
                    StoreError::Integrity(format!("{} is not a valid store: {}", path.display(), e))
                })?
                .reindex(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConversationTables::new(),
            Err(e) => return Err(StoreError::Io(format!("{}: {}", path.display(), e))),
        };
        debug!("Opened conversation store at {}", path.display());

        Ok(Self {
            path,
            tables: RwLock::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomically(path: &Path, tables: &ConversationTables) -> Result<(), StoreError> {
        let io = |e: std::io::Error| StoreError::Io(format!("{}: {}", path.display(), e));
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(io)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io)?;
        serde_json::to_writer(tmp.as_file_mut(), tables)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        tmp.as_file_mut().flush().map_err(io)?;
        tmp.as_file_mut().sync_all().map_err(io)?;
        tmp.persist(path).map_err(|e| io(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for JsonFileConversationStore {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.tables.read().await.session(id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        Ok(self.tables.read().await.sessions())
    }

    async fn get_turn(&self, id: &str) -> Result<Option<Turn>, StoreError> {
        Ok(self.tables.read().await.turn(id).cloned())
    }

    async fn turns_for_session(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        Ok(self.tables.read().await.turns_for_session(session_id))
    }

    async fn responses_for_turn(
        &self,
        ai_turn_id: &str,
    ) -> Result<Vec<ProviderResponse>, StoreError> {
        Ok(self.tables.read().await.responses_for_turn(ai_turn_id))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        // Held across the file write so commits are serialized.
        let mut tables = self.tables.write().await;
        let records = batch.len();

        let mut next = tables.clone();
        next.apply(batch)?;

        // File I/O runs on the blocking pool.
        let path = self.path.clone();
        *tables = tokio::task::spawn_blocking(move || {
            Self::write_atomically(&path, &next)?;
            Ok::<_, StoreError>(next)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("store write task failed: {}", e)))??;

        debug!("Committed {} records to {}", records, self.path.display());
        Ok(())
    }
}
