use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use super::chat_repository::{
    BoxFuture, ChatRecord, ChatRepository, ChatSummary, MessageRecord, NewChat,
};
use super::error::{RepositoryError, RepositoryResult};

/// In-memory conversation store.
/// Useful for testing and development.
#[derive(Clone, Default)]
pub struct InMemoryChatRepository {
    chats: Arc<Mutex<HashMap<String, ChatRecord>>>,
    messages: Arc<Mutex<Vec<MessageRecord>>>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages across all conversations.
    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }
}

impl ChatRepository for InMemoryChatRepository {
    fn create_chat(&self, chat: NewChat) -> BoxFuture<'static, RepositoryResult<ChatRecord>> {
        let chats = self.chats.clone();

        Box::pin(async move {
            let now = Utc::now();
            let record = ChatRecord {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: chat.user_id,
                name: chat.name,
                model: chat.model,
                created_at: now,
                updated_at: now,
            };
            chats.lock().insert(record.id.clone(), record.clone());
            Ok(record)
        })
    }

    fn list_chats(&self, user_id: &str) -> BoxFuture<'static, RepositoryResult<Vec<ChatSummary>>> {
        let chats = self.chats.clone();
        let user_id = user_id.to_string();

        Box::pin(async move {
            let mut result: Vec<ChatSummary> = chats
                .lock()
                .values()
                .filter(|c| c.user_id == user_id)
                .map(|c| ChatSummary {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    updated_at: c.updated_at,
                })
                .collect();

            // Sort by updated_at descending
            result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

            Ok(result)
        })
    }

    fn load_messages(
        &self,
        chat_id: &str,
    ) -> BoxFuture<'static, RepositoryResult<Vec<MessageRecord>>> {
        let messages = self.messages.clone();
        let chat_id = chat_id.to_string();

        Box::pin(async move {
            let mut result: Vec<MessageRecord> = messages
                .lock()
                .iter()
                .filter(|m| m.chat_id == chat_id)
                .cloned()
                .collect();

            result.sort_by_key(|m| m.created_at);

            Ok(result)
        })
    }

    fn insert_message(&self, record: MessageRecord) -> BoxFuture<'static, RepositoryResult<()>> {
        let messages = self.messages.clone();

        Box::pin(async move {
            messages.lock().push(record);
            Ok(())
        })
    }

    fn update_message(&self, record: MessageRecord) -> BoxFuture<'static, RepositoryResult<()>> {
        let messages = self.messages.clone();

        Box::pin(async move {
            let mut store = messages.lock();
            match store.iter_mut().find(|m| m.id == record.id) {
                Some(existing) => {
                    *existing = record;
                    Ok(())
                }
                None => Err(RepositoryError::NotFound { id: record.id }),
            }
        })
    }

    fn delete_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let messages = self.messages.clone();
        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();

        Box::pin(async move {
            messages
                .lock()
                .retain(|m| !(m.chat_id == chat_id && m.id == message_id));
            Ok(())
        })
    }

    fn delete_from_sequence(
        &self,
        chat_id: &str,
        sequence_number: i64,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let messages = self.messages.clone();
        let chat_id = chat_id.to_string();

        Box::pin(async move {
            messages
                .lock()
                .retain(|m| !(m.chat_id == chat_id && m.sequence_number >= sequence_number));
            Ok(())
        })
    }

    fn touch_chat(&self, chat_id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let chats = self.chats.clone();
        let chat_id = chat_id.to_string();

        Box::pin(async move {
            let mut store = chats.lock();
            match store.get_mut(&chat_id) {
                Some(chat) => {
                    chat.updated_at = Utc::now();
                    Ok(())
                }
                None => Err(RepositoryError::NotFound { id: chat_id }),
            }
        })
    }
}
