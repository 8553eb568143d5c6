//! Conversation store adapters.

mod json_file;
mod memory;
mod tables;

pub use json_file::JsonFileConversationStore;
pub use memory::InMemoryConversationStore;
pub use tables::ConversationTables;

#[cfg(test)]
pub(crate) mod fixtures {
    use parley_domain::{
        AiTurn, AiTurnMeta, DEFAULT_THREAD_ID, ProviderContexts, ProviderResponse, ResponseStatus,
        ResponseType, Session, Turn, UserTurn,
    };
    use serde_json::Value;

    pub fn session(id: &str) -> Session {
        let now = chrono::Utc::now();
        Session {
            id: id.to_string(),
            title: "test".to_string(),
            created_at: now,
            last_activity: now,
            turn_count: 2,
            last_turn_id: None,
        }
    }

    pub fn user_turn(id: &str, session_id: &str, sequence: i64) -> Turn {
        Turn::User(UserTurn {
            id: id.to_string(),
            session_id: session_id.to_string(),
            thread_id: DEFAULT_THREAD_ID.to_string(),
            content: "question".to_string(),
            sequence,
            created_at: chrono::Utc::now(),
        })
    }

    pub fn ai_turn(id: &str, user_turn_id: &str, session_id: &str, sequence: i64) -> Turn {
        Turn::Ai(AiTurn {
            id: id.to_string(),
            user_turn_id: user_turn_id.to_string(),
            session_id: session_id.to_string(),
            thread_id: DEFAULT_THREAD_ID.to_string(),
            created_at: chrono::Utc::now(),
            provider_contexts: ProviderContexts::default(),
            sequence,
            batch_response_count: 1,
            mapping_response_count: 0,
            synthesis_response_count: 0,
            meta: AiTurnMeta::default(),
        })
    }

    pub fn response(ai_turn_id: &str, provider: &str, text: &str) -> ProviderResponse {
        let now = chrono::Utc::now();
        ProviderResponse {
            id: ProviderResponse::key_id(ai_turn_id, provider, ResponseType::Batch, 0),
            session_id: "s-1".to_string(),
            ai_turn_id: ai_turn_id.to_string(),
            provider_id: provider.to_string(),
            response_type: ResponseType::Batch,
            response_index: 0,
            text: text.to_string(),
            status: ResponseStatus::Completed,
            meta: Value::Null,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
