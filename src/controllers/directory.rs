use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::models::history::SharedHistory;
use crate::models::message::{Message, MessageAttachment};
use crate::models::notifier::{NoticeLevel, Notifier};
use crate::repositories::chat_repository::{ChatRepository, ChatSummary, MessageRecord};
use crate::session::ChatSession;

use super::chat_controller::{ActiveChat, SharedActiveChat};

/// A conversation load slower than this is surfaced as a failure. The
/// underlying call is abandoned, not aborted.
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Conversation list and selection for one signed-in session.
///
/// Shares the history and active-chat handles with the send orchestrator:
/// selecting a conversation here is what the next send targets. Refreshes
/// are triggered by screen focus, not a timer, and a refresh that finishes
/// after focus moved on is discarded.
pub struct ChatDirectory {
    session: ChatSession,
    repo: Arc<dyn ChatRepository>,
    notifier: Notifier,
    history: SharedHistory,
    active_chat: SharedActiveChat,
    chats: Mutex<Vec<ChatSummary>>,
    focus_epoch: AtomicU64,
}

impl ChatDirectory {
    pub fn new(
        session: ChatSession,
        repo: Arc<dyn ChatRepository>,
        history: SharedHistory,
        active_chat: SharedActiveChat,
        notifier: Notifier,
    ) -> Self {
        Self {
            session,
            repo,
            notifier,
            history,
            active_chat,
            chats: Mutex::new(Vec::new()),
            focus_epoch: AtomicU64::new(0),
        }
    }

    /// Cached conversation list, `updated_at` descending.
    pub fn chats(&self) -> Vec<ChatSummary> {
        self.chats.lock().clone()
    }

    pub fn active_chat_id(&self) -> Option<String> {
        self.active_chat.lock().as_ref().map(|c| c.id.clone())
    }

    /// Invalidate any in-flight refresh when the screen loses focus.
    pub fn note_blur(&self) {
        self.focus_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Reload the conversation list. Called on every screen-focus event.
    /// A response that arrives after the screen lost focus again is
    /// discarded and the previous cache is returned instead.
    pub async fn refresh_on_focus(&self) -> Result<Vec<ChatSummary>> {
        let epoch = self.focus_epoch.load(Ordering::SeqCst);
        let listed = self
            .repo
            .list_chats(&self.session.user_id)
            .await
            .context("Failed to load conversations")?;

        if self.focus_epoch.load(Ordering::SeqCst) != epoch {
            debug!("Focus moved on during refresh, keeping previous conversation list");
            return Ok(self.chats());
        }

        info!(count = listed.len(), "Loaded conversation list");
        *self.chats.lock() = listed.clone();
        Ok(listed)
    }

    /// Load a conversation's messages and make it the active target.
    pub async fn select_chat(&self, chat_id: &str) -> Result<()> {
        self.select_chat_with_timeout(chat_id, LOAD_TIMEOUT).await
    }

    async fn select_chat_with_timeout(&self, chat_id: &str, timeout: Duration) -> Result<()> {
        let load = self.repo.load_messages(chat_id);
        let records = match tokio::time::timeout(timeout, load).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                warn!(error = ?e, chat_id = %chat_id, "Failed to load conversation");
                self.notifier.toast(
                    NoticeLevel::Error,
                    "Failed to load conversation",
                    Some(e.to_string()),
                );
                return Err(e.into());
            }
            Err(_) => {
                warn!(chat_id = %chat_id, "Conversation load timed out");
                self.notifier.toast(
                    NoticeLevel::Error,
                    "Failed to load conversation",
                    Some(format!("Loading took longer than {} seconds", timeout.as_secs())),
                );
                return Err(anyhow!("conversation load timed out"));
            }
        };

        let name = self
            .chats
            .lock()
            .iter()
            .find(|c| c.id == chat_id)
            .map(|c| c.name.clone())
            .unwrap_or_default();

        let messages: Vec<Message> = records.into_iter().map(decode_record).collect();
        debug!(chat_id = %chat_id, count = messages.len(), "Conversation loaded");

        self.history.lock().replace_all(messages);
        *self.active_chat.lock() = Some(ActiveChat {
            id: chat_id.to_string(),
            name,
        });
        Ok(())
    }

    /// Return to the blank state where the next send creates a new
    /// conversation.
    pub fn deselect(&self) {
        self.history.lock().clear();
        *self.active_chat.lock() = None;
    }
}

/// Rebuild a history entry from its stored row. Attachment metadata lives
/// in dedicated fields; an inline image is a `data:` ref, anything else is
/// a storage path the shell resolves to a public URL.
fn decode_record(record: MessageRecord) -> Message {
    let attachment = if let Some(name) = record.file_name {
        Some(MessageAttachment::File {
            name,
            stored_path: record.attachment_refs.first().cloned(),
        })
    } else if let Some(uri) = record.audio_url {
        Some(MessageAttachment::Audio {
            uri,
            duration_ms: 0,
        })
    } else {
        record
            .attachment_refs
            .first()
            .map(|uri| MessageAttachment::Image { uri: uri.clone() })
    };

    Message {
        id: record.id,
        role: record.role,
        text: record.content,
        created_at: record.created_at,
        attachment,
        is_typing: false,
        is_sending: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::history::shared_history;
    use crate::models::message::Role;
    use crate::models::notifier::UiNotice;
    use crate::repositories::chat_repository::{
        BoxFuture, ChatRecord, NewChat,
    };
    use crate::repositories::error::RepositoryResult;
    use crate::repositories::in_memory_repository::InMemoryChatRepository;
    use chrono::Utc;

    fn test_session() -> ChatSession {
        ChatSession {
            access_token: "token".to_string(),
            user_id: "user-1".to_string(),
            display_name: "Jane".to_string(),
            workspace_id: None,
            selected_model: "gpt-4o".to_string(),
            embeddings_provider: "openai".to_string(),
            base_url: "https://backend.example".to_string(),
        }
    }

    fn directory(
        repo: Arc<dyn ChatRepository>,
    ) -> (
        ChatDirectory,
        SharedHistory,
        tokio::sync::mpsc::UnboundedReceiver<UiNotice>,
    ) {
        let history = shared_history();
        let active = Arc::new(Mutex::new(None));
        let (notifier, rx) = Notifier::channel();
        let dir = ChatDirectory::new(test_session(), repo, history.clone(), active, notifier);
        (dir, history, rx)
    }

    fn record(id: &str, chat_id: &str, content: &str, sequence: i64) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            chat_id: chat_id.to_string(),
            user_id: "user-1".to_string(),
            content: content.to_string(),
            role: if sequence % 2 == 0 {
                Role::User
            } else {
                Role::Assistant
            },
            model: None,
            sequence_number: sequence,
            attachment_refs: Vec::new(),
            file_name: None,
            audio_url: None,
            created_at: Utc::now() + chrono::Duration::milliseconds(sequence),
        }
    }

    #[tokio::test]
    async fn test_select_chat_populates_history_and_active_id() {
        let repo = InMemoryChatRepository::new();
        let chat = repo
            .create_chat(NewChat {
                user_id: "user-1".to_string(),
                workspace_id: None,
                name: "Plans".to_string(),
                model: "gpt-4o".to_string(),
                embeddings_provider: "openai".to_string(),
            })
            .await
            .unwrap();
        repo.insert_message(record("m0", &chat.id, "hello", 0))
            .await
            .unwrap();
        repo.insert_message(record("m1", &chat.id, "hi!", 1))
            .await
            .unwrap();

        let (dir, history, _rx) = directory(Arc::new(repo));
        dir.refresh_on_focus().await.unwrap();
        dir.select_chat(&chat.id).await.unwrap();

        let entries = history.lock();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.messages()[0].text, "hello");
        assert_eq!(entries.messages()[1].role, Role::Assistant);
        assert!(!entries.messages()[1].is_typing);
        drop(entries);

        assert_eq!(dir.active_chat_id().as_deref(), Some(chat.id.as_str()));
    }

    #[tokio::test]
    async fn test_deselect_clears_history_and_active_id() {
        let repo = InMemoryChatRepository::new();
        let chat = repo
            .create_chat(NewChat {
                user_id: "user-1".to_string(),
                workspace_id: None,
                name: "Plans".to_string(),
                model: "gpt-4o".to_string(),
                embeddings_provider: "openai".to_string(),
            })
            .await
            .unwrap();

        let (dir, history, _rx) = directory(Arc::new(repo));
        dir.select_chat(&chat.id).await.unwrap();
        dir.deselect();

        assert!(history.lock().is_empty());
        assert!(dir.active_chat_id().is_none());
    }

    /// Repository whose load never resolves, for the timeout path.
    #[derive(Clone)]
    struct StalledRepository;

    impl ChatRepository for StalledRepository {
        fn create_chat(&self, _chat: NewChat) -> BoxFuture<'static, RepositoryResult<ChatRecord>> {
            unimplemented!("not used by this test")
        }

        fn list_chats(
            &self,
            _user_id: &str,
        ) -> BoxFuture<'static, RepositoryResult<Vec<ChatSummary>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn load_messages(
            &self,
            _chat_id: &str,
        ) -> BoxFuture<'static, RepositoryResult<Vec<MessageRecord>>> {
            Box::pin(async {
                futures::future::pending::<()>().await;
                Ok(Vec::new())
            })
        }

        fn insert_message(
            &self,
            _record: MessageRecord,
        ) -> BoxFuture<'static, RepositoryResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn update_message(
            &self,
            _record: MessageRecord,
        ) -> BoxFuture<'static, RepositoryResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn delete_message(
            &self,
            _chat_id: &str,
            _message_id: &str,
        ) -> BoxFuture<'static, RepositoryResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn delete_from_sequence(
            &self,
            _chat_id: &str,
            _sequence_number: i64,
        ) -> BoxFuture<'static, RepositoryResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn touch_chat(&self, _chat_id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn test_slow_load_is_surfaced_as_failure() {
        let (dir, history, mut rx) = directory(Arc::new(StalledRepository));

        let result = dir
            .select_chat_with_timeout("chat-1", Duration::from_millis(30))
            .await;
        assert!(result.is_err());
        assert!(history.lock().is_empty());
        assert!(dir.active_chat_id().is_none());
        assert!(matches!(rx.try_recv(), Ok(UiNotice::Toast { .. })));
    }

    /// Repository whose listing waits for the test before resolving.
    #[derive(Clone)]
    struct GatedListRepository {
        gate: Arc<tokio::sync::Notify>,
    }

    impl ChatRepository for GatedListRepository {
        fn create_chat(&self, _chat: NewChat) -> BoxFuture<'static, RepositoryResult<ChatRecord>> {
            unimplemented!("not used by this test")
        }

        fn list_chats(
            &self,
            _user_id: &str,
        ) -> BoxFuture<'static, RepositoryResult<Vec<ChatSummary>>> {
            let gate = self.gate.clone();
            Box::pin(async move {
                gate.notified().await;
                Ok(vec![ChatSummary {
                    id: "chat-1".to_string(),
                    name: "Plans".to_string(),
                    updated_at: Utc::now(),
                }])
            })
        }

        fn load_messages(
            &self,
            _chat_id: &str,
        ) -> BoxFuture<'static, RepositoryResult<Vec<MessageRecord>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn insert_message(
            &self,
            _record: MessageRecord,
        ) -> BoxFuture<'static, RepositoryResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn update_message(
            &self,
            _record: MessageRecord,
        ) -> BoxFuture<'static, RepositoryResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn delete_message(
            &self,
            _chat_id: &str,
            _message_id: &str,
        ) -> BoxFuture<'static, RepositoryResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn delete_from_sequence(
            &self,
            _chat_id: &str,
            _sequence_number: i64,
        ) -> BoxFuture<'static, RepositoryResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn touch_chat(&self, _chat_id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn test_stale_refresh_is_discarded_after_blur() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let (dir, _history, _rx) = directory(Arc::new(GatedListRepository {
            gate: gate.clone(),
        }));
        let dir = Arc::new(dir);

        let refreshing = {
            let dir = dir.clone();
            tokio::spawn(async move { dir.refresh_on_focus().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Focus moves away while the response is still in flight.
        dir.note_blur();
        gate.notify_one();

        let listed = refreshing.await.unwrap().unwrap();
        assert!(listed.is_empty());
        assert!(dir.chats().is_empty());

        // The next focused refresh applies normally.
        gate.notify_one();
        let listed = dir.refresh_on_focus().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(dir.chats()[0].name, "Plans");
    }

    #[test]
    fn test_decode_record_reconstructs_attachments() {
        let mut rec = MessageRecord {
            id: "m0".to_string(),
            chat_id: "c0".to_string(),
            user_id: "user-1".to_string(),
            content: "look".to_string(),
            role: Role::User,
            model: None,
            sequence_number: 0,
            attachment_refs: vec!["data:image/png;base64,AAAA".to_string()],
            file_name: None,
            audio_url: None,
            created_at: Utc::now(),
        };
        assert!(matches!(
            decode_record(rec.clone()).attachment,
            Some(MessageAttachment::Image { .. })
        ));

        rec.attachment_refs = vec!["u1/notes.pdf".to_string()];
        rec.file_name = Some("notes.pdf".to_string());
        match decode_record(rec.clone()).attachment {
            Some(MessageAttachment::File { name, stored_path }) => {
                assert_eq!(name, "notes.pdf");
                assert_eq!(stored_path.as_deref(), Some("u1/notes.pdf"));
            }
            other => panic!("expected file attachment, got {other:?}"),
        }

        rec.attachment_refs = Vec::new();
        rec.file_name = None;
        rec.audio_url = Some("https://cdn.example/voice.m4a".to_string());
        assert!(matches!(
            decode_record(rec).attachment,
            Some(MessageAttachment::Audio { .. })
        ));
    }
}
