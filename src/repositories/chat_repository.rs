use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::message::Role;

use super::error::RepositoryResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request to create a conversation; the backend mints the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChat {
    pub user_id: String,
    pub workspace_id: Option<String>,
    pub name: String,
    pub model: String,
    pub embeddings_provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lightweight listing row for the conversation directory.
#[derive(Debug, Clone)]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

/// Persisted message row.
///
/// Attachments are carried in dedicated fields (`attachment_refs`,
/// `file_name`, `audio_url`) instead of marker tokens inside `content`, so
/// loading never has to guess at encodings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub chat_id: String,
    pub user_id: String,
    pub content: String,
    pub role: Role,
    pub model: Option<String>,
    pub sequence_number: i64,
    #[serde(default)]
    pub attachment_refs: Vec<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Conversation store seam.
pub trait ChatRepository: Send + Sync + 'static {
    fn create_chat(&self, chat: NewChat) -> BoxFuture<'static, RepositoryResult<ChatRecord>>;

    /// Conversations for an identity, ordered by `updated_at` descending.
    fn list_chats(&self, user_id: &str) -> BoxFuture<'static, RepositoryResult<Vec<ChatSummary>>>;

    /// Messages of a conversation, ordered by `created_at` ascending.
    fn load_messages(
        &self,
        chat_id: &str,
    ) -> BoxFuture<'static, RepositoryResult<Vec<MessageRecord>>>;

    fn insert_message(&self, record: MessageRecord) -> BoxFuture<'static, RepositoryResult<()>>;

    fn update_message(&self, record: MessageRecord) -> BoxFuture<'static, RepositoryResult<()>>;

    fn delete_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Delete every message of the conversation whose sequence number is
    /// greater than or equal to `sequence_number`.
    fn delete_from_sequence(
        &self,
        chat_id: &str,
        sequence_number: i64,
    ) -> BoxFuture<'static, RepositoryResult<()>>;

    fn touch_chat(&self, chat_id: &str) -> BoxFuture<'static, RepositoryResult<()>>;
}
