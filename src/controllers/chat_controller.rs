use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::models::attachment::{FileAsset, SharedStaging, shared_staging};
use crate::models::history::{SharedHistory, shared_history};
use crate::models::message::{Message, MessageAttachment, Role, annotate_with_file};
use crate::models::notifier::{NoticeLevel, Notifier};
use crate::models::reconciler::StreamReconciler;
use crate::models::recorder::FinishedRecording;
use crate::repositories::chat_repository::{ChatRepository, MessageRecord, NewChat};
use crate::services::completion::{
    ApiContent, ApiMessage, ChatSettings, CompletionApi, CompletionPayload, CompletionRequest,
    ContentPart, ImageUrl, ModelMode, StreamChunk, TRANSCRIBE_ONLY_MODEL, model_mode,
};
use crate::services::retrieval::{ProcessableFile, RetrievalApi};
use crate::services::storage::FileStorage;
use crate::services::transcription::TranscriptionApi;
use crate::session::ChatSession;

/// The conversation the controller is currently targeting. `None` until the
/// first message of a new conversation is actually sent.
#[derive(Clone, Debug)]
pub struct ActiveChat {
    pub id: String,
    pub name: String,
}

pub type SharedActiveChat = Arc<Mutex<Option<ActiveChat>>>;

/// Remote collaborators injected into the controller.
pub struct Backends {
    pub repository: Arc<dyn ChatRepository>,
    pub completion: Arc<dyn CompletionApi>,
    pub retrieval: Arc<dyn RetrievalApi>,
    pub storage: Arc<dyn FileStorage>,
    pub transcription: Arc<dyn TranscriptionApi>,
}

/// Synchronous rejections of a send or regenerate. None of these mutate any
/// state; they surface as ephemeral feedback, never as history entries.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("a send is already in flight")]
    AlreadySending,
    #[error("message is empty and no attachment is staged")]
    EmptyPayload,
    #[error("attachment is still uploading")]
    AttachmentUploading,
    #[error("attachment upload failed; clear or retry it before sending")]
    AttachmentFailed,
    #[error("no preceding user message to regenerate from")]
    NoPrecedingUserMessage,
    #[error("message not found: {0}")]
    MessageNotFound(String),
}

enum DispatchResult {
    Streamed,
    Payload(CompletionPayload),
}

/// Send orchestrator for one signed-in session.
///
/// Owns the optimistic append, the lazy conversation creation, the
/// attachment pipeline, the dispatch mode decision and the persistence of
/// the finished turn. At most one send is in flight; a second attempt is
/// rejected outright rather than queued. Every failure inside the
/// asynchronous phase funnels into the reconciler's error path, so a stuck
/// typing placeholder cannot happen.
#[derive(Clone)]
pub struct ChatController {
    session: ChatSession,
    repo: Arc<dyn ChatRepository>,
    completion: Arc<dyn CompletionApi>,
    retrieval: Arc<dyn RetrievalApi>,
    storage: Arc<dyn FileStorage>,
    transcription: Arc<dyn TranscriptionApi>,
    notifier: Notifier,
    history: SharedHistory,
    staging: SharedStaging,
    active_chat: SharedActiveChat,
    model: Arc<Mutex<String>>,
    sending: Arc<AtomicBool>,
    edit_draft: Arc<Mutex<Option<String>>>,
}

impl ChatController {
    pub fn new(session: ChatSession, backends: Backends, notifier: Notifier) -> Self {
        let model = session.selected_model.clone();
        Self {
            session,
            repo: backends.repository,
            completion: backends.completion,
            retrieval: backends.retrieval,
            storage: backends.storage,
            transcription: backends.transcription,
            notifier,
            history: shared_history(),
            staging: shared_staging(),
            active_chat: Arc::new(Mutex::new(None)),
            model: Arc::new(Mutex::new(model)),
            sending: Arc::new(AtomicBool::new(false)),
            edit_draft: Arc::new(Mutex::new(None)),
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn history_handle(&self) -> SharedHistory {
        self.history.clone()
    }

    pub fn staging_handle(&self) -> SharedStaging {
        self.staging.clone()
    }

    pub fn active_chat_handle(&self) -> SharedActiveChat {
        self.active_chat.clone()
    }

    pub fn active_chat_id(&self) -> Option<String> {
        self.active_chat.lock().as_ref().map(|c| c.id.clone())
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    pub fn model(&self) -> String {
        self.model.lock().clone()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        *self.model.lock() = model.into();
    }

    pub fn edit_draft(&self) -> Option<String> {
        self.edit_draft.lock().clone()
    }

    /// Stage an image for the next send, replacing any staged file.
    pub fn attach_image(&self, uri: impl Into<String>) {
        self.staging.lock().stage_image(uri);
    }

    /// Stage a file and start its upload. The staged entry moves to
    /// `Uploaded` or `Error`; an errored entry stays visible for the user
    /// to retry or dismiss.
    pub fn attach_file(&self, asset: FileAsset, bytes: Vec<u8>) -> JoinHandle<()> {
        self.staging.lock().stage_file(asset.clone());

        let this = self.clone();
        tokio::spawn(async move {
            let path = format!(
                "{}/{}_{}",
                this.session.user_id,
                Utc::now().timestamp_millis(),
                asset.name
            );
            let mime = asset
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string());

            match this
                .storage
                .upload(&this.session.access_token, &path, bytes, &mime)
                .await
            {
                Ok(stored_path) => {
                    debug!(path = %stored_path, "File upload finished");
                    this.staging.lock().mark_uploaded(stored_path);
                }
                Err(e) => {
                    warn!(error = ?e, name = %asset.name, "File upload failed");
                    this.staging.lock().mark_error(e.to_string());
                }
            }
        })
    }

    pub fn clear_attachment(&self) {
        self.staging.lock().clear();
    }

    /// Prepare a prior user message for editing: returns its plain text as
    /// the new draft and clears any pending staging. Submitting the edited
    /// draft is a normal send; the original message is not mutated.
    pub fn begin_edit(&self, message_id: &str) -> Result<String, SendError> {
        let text = self
            .history
            .lock()
            .get(message_id)
            .ok_or_else(|| SendError::MessageNotFound(message_id.to_string()))?
            .plain_text();
        self.staging.lock().clear();
        *self.edit_draft.lock() = Some(text.clone());
        Ok(text)
    }

    pub fn cancel_edit(&self) {
        *self.edit_draft.lock() = None;
    }

    /// Dispatch a user message. Returns the handle of the asynchronous
    /// phase; the optimistic user message and typing placeholder are
    /// already in history when this returns.
    pub fn send_message(
        &self,
        text: &str,
        model_override: Option<&str>,
    ) -> Result<JoinHandle<()>, SendError> {
        let text = text.trim();

        if self.sending.load(Ordering::SeqCst) {
            debug!("Send rejected, another send is in flight");
            return Err(SendError::AlreadySending);
        }

        let staged = self.staging.lock().clone();
        if staged.upload_in_flight() {
            return Err(SendError::AttachmentUploading);
        }
        if staged.upload_failed() {
            return Err(SendError::AttachmentFailed);
        }

        let staged_image = staged.staged_image().map(str::to_string);
        let usable_file = staged
            .usable_file()
            .map(|(asset, path)| (asset.clone(), path.to_string()));

        if text.is_empty() && staged_image.is_none() && usable_file.is_none() {
            return Err(SendError::EmptyPayload);
        }

        if self
            .sending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SendError::AlreadySending);
        }

        let (outbound_text, attachment, processable) = match (usable_file, staged_image) {
            (Some((asset, stored_path)), _) => {
                let processable = ProcessableFile {
                    name: asset.name.clone(),
                    mime_type: asset
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    size: asset.size.unwrap_or(0),
                    file_path: stored_path.clone(),
                    embeddings_provider: self.session.embeddings_provider.clone(),
                };
                (
                    annotate_with_file(text, &asset.name),
                    Some(MessageAttachment::File {
                        name: asset.name,
                        stored_path: Some(stored_path),
                    }),
                    Some(processable),
                )
            }
            (None, Some(uri)) => (
                text.to_string(),
                Some(MessageAttachment::Image { uri }),
                None,
            ),
            (None, None) => (text.to_string(), None, None),
        };

        let mut outbound = Message::user(outbound_text);
        if let Some(attachment) = attachment {
            outbound = outbound.with_attachment(attachment);
        }
        let placeholder = Message::typing_placeholder();
        let placeholder_id = placeholder.id.clone();

        // One update for both entries; no render ever sees the outbound
        // message without its placeholder.
        self.history.lock().push_pair(outbound.clone(), placeholder);
        self.staging.lock().clear();
        *self.edit_draft.lock() = None;

        let model = match model_override {
            Some(model) => model.to_string(),
            None => self.model(),
        };

        let this = self.clone();
        Ok(tokio::spawn(async move {
            this.run_send_pipeline(model, outbound, placeholder_id, processable)
                .await;
        }))
    }

    /// Discard the assistant reply at `index` and everything after it, then
    /// resend the preceding user prompt. Fails without touching history
    /// when that predecessor is missing or not a user message.
    pub fn regenerate(&self, index: usize) -> Result<JoinHandle<()>, SendError> {
        if self.sending.load(Ordering::SeqCst) {
            return Err(SendError::AlreadySending);
        }
        {
            let staging = self.staging.lock();
            if staging.upload_in_flight() {
                return Err(SendError::AttachmentUploading);
            }
            if staging.upload_failed() {
                return Err(SendError::AttachmentFailed);
            }
        }

        let prompt = {
            let entries = self.history.lock();
            if entries.message_at(index).is_none() {
                return Err(SendError::MessageNotFound(index.to_string()));
            }
            let previous = entries
                .preceding_user(index)
                .ok_or(SendError::NoPrecedingUserMessage)?;
            previous.plain_text()
        };
        if prompt.trim().is_empty() {
            return Err(SendError::EmptyPayload);
        }

        info!(index = index, "Regenerating from preceding user message");
        self.history.lock().truncate_from(index);

        // Mirror the truncation to the store; local history stays
        // authoritative if this fails.
        if let Some(active) = self.active_chat.lock().clone() {
            let repo = self.repo.clone();
            tokio::spawn(async move {
                if let Err(e) = repo.delete_from_sequence(&active.id, index as i64).await {
                    warn!(error = ?e, chat_id = %active.id, "Failed to delete regenerated tail from store");
                }
            });
        }

        self.send_message(&prompt, None)
    }

    /// Hand a finished voice recording to transcription. The transcript
    /// either becomes a normal send, or for the transcribe-only model is
    /// shown directly as a user audio turn plus the transcript.
    pub fn submit_recording(
        &self,
        recording: FinishedRecording,
        audio: Vec<u8>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let file_name = format!("recording-{}.m4a", Utc::now().timestamp_millis());
            let transcript = match this
                .transcription
                .transcribe(&this.session.access_token, &file_name, audio, "audio/m4a")
                .await
            {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = ?e, "Voice transcription failed");
                    this.notifier
                        .alert("Transcription failed", e.to_string());
                    return;
                }
            };

            if this.model() == TRANSCRIBE_ONLY_MODEL {
                let seconds = recording.duration_ms / 1000;
                let user = Message::user(format!("(Voice message: {seconds} s)"))
                    .with_attachment(MessageAttachment::Audio {
                        uri: recording.uri,
                        duration_ms: recording.duration_ms,
                    })
                    .sent();
                let assistant = Message::assistant(transcript);
                let mut entries = this.history.lock();
                entries.push(user);
                entries.push(assistant);
                return;
            }

            if let Err(e) = this.send_message(&transcript, None) {
                this.notifier
                    .toast(NoticeLevel::Error, "Could not send transcript", Some(e.to_string()));
            }
        })
    }

    async fn run_send_pipeline(
        self,
        model: String,
        outbound: Message,
        placeholder_id: String,
        processable: Option<ProcessableFile>,
    ) {
        let mode = model_mode(&model);
        let reconciler = match mode {
            ModelMode::Streaming => StreamReconciler::begin_streaming(
                self.history.clone(),
                placeholder_id,
                self.sending.clone(),
            ),
            ModelMode::SingleShot => StreamReconciler::begin_single_shot(
                self.history.clone(),
                placeholder_id,
                self.sending.clone(),
            ),
        };

        match self
            .drive_send(&model, mode, &outbound, processable, &reconciler)
            .await
        {
            Ok((chat_id, result)) => self.finish_send(&model, chat_id, result, reconciler).await,
            Err(e) => {
                error!(error = ?e, "Send pipeline failed");
                reconciler.finalize_error(&format!("{e:#}"));
            }
        }
    }

    async fn drive_send(
        &self,
        model: &str,
        mode: ModelMode,
        outbound: &Message,
        processable: Option<ProcessableFile>,
        reconciler: &StreamReconciler,
    ) -> Result<(String, DispatchResult)> {
        if !self.session.is_valid() {
            anyhow::bail!("Invalid session: please sign in again");
        }
        let token = self.session.access_token.clone();

        let chat_id = self.ensure_chat(outbound, model).await?;

        // Optimistic timestamp bump so the directory reorders immediately.
        if let Err(e) = self.repo.touch_chat(&chat_id).await {
            warn!(error = ?e, "Optimistic timestamp update failed");
        }

        let user_record = self.record_from_message(&chat_id, outbound, None);
        if let Err(e) = self.repo.insert_message(user_record).await {
            warn!(error = ?e, "Failed to persist outbound message");
            self.notifier.toast(
                NoticeLevel::Error,
                "Failed to save message",
                Some(e.to_string()),
            );
        }

        // Process and retrieval failures lose the supplementary context but
        // never abort the turn.
        let mut file_ids: Vec<String> = Vec::new();
        if let Some(file) = processable {
            self.notifier
                .toast(NoticeLevel::Info, "Processing file...", Some(file.name.clone()));
            match self.retrieval.process_file(&token, &file).await {
                Ok(file_id) => {
                    self.notifier
                        .toast(NoticeLevel::Success, "File processed", Some(file.name.clone()));
                    file_ids.push(file_id);
                }
                Err(e) => {
                    warn!(error = ?e, name = %file.name, "File processing failed");
                    self.notifier.toast(
                        NoticeLevel::Error,
                        format!("File processing failed: {}", file.name),
                        Some(e.to_string()),
                    );
                }
            }
        }

        let mut context_text = String::new();
        if !file_ids.is_empty() {
            match self
                .retrieval
                .retrieve(&token, &outbound.text, &file_ids)
                .await
            {
                Ok(context) => context_text = context,
                Err(e) => {
                    warn!(error = ?e, "Context retrieval failed");
                    self.notifier.toast(
                        NoticeLevel::Error,
                        "Could not read file content",
                        Some("Continuing without it".to_string()),
                    );
                }
            }
        }

        let messages = build_api_history(&self.history.lock().api_history(), &context_text);
        let request = CompletionRequest {
            chat_settings: ChatSettings {
                model: model.to_string(),
            },
            messages,
            enable_web_search: true,
            chat_id: chat_id.clone(),
            is_user_message_saved: true,
        };

        match mode {
            ModelMode::Streaming => {
                let mut stream = self.completion.stream(&token, request).await?;
                while let Some(chunk) = stream.next().await {
                    match chunk? {
                        StreamChunk::Text(delta) => reconciler.append(&delta),
                        StreamChunk::Done => break,
                        StreamChunk::Error(message) => return Err(anyhow!(message)),
                    }
                }
                Ok((chat_id, DispatchResult::Streamed))
            }
            ModelMode::SingleShot => {
                let payload = self.completion.complete(&token, request).await?;
                Ok((chat_id, DispatchResult::Payload(payload)))
            }
        }
    }

    async fn finish_send(
        &self,
        model: &str,
        chat_id: String,
        result: DispatchResult,
        reconciler: StreamReconciler,
    ) {
        let placeholder_id = reconciler.placeholder_id().to_string();

        let (text, image_url, audio_url) = match result {
            DispatchResult::Streamed => (reconciler.finalize(None), None, None),
            DispatchResult::Payload(payload) => {
                let attachment = payload
                    .image_url
                    .clone()
                    .map(|uri| MessageAttachment::Image { uri })
                    .or_else(|| {
                        payload.audio_url.clone().map(|uri| MessageAttachment::Audio {
                            uri,
                            duration_ms: 0,
                        })
                    });
                let text = reconciler.finalize_payload(payload.text.clone(), attachment);
                (text, payload.image_url, payload.audio_url)
            }
        };

        let sequence = self
            .history
            .lock()
            .index_of(&placeholder_id)
            .unwrap_or_default() as i64;
        let record = MessageRecord {
            id: placeholder_id,
            chat_id: chat_id.clone(),
            user_id: self.session.user_id.clone(),
            content: text,
            role: Role::Assistant,
            model: Some(model.to_string()),
            sequence_number: sequence,
            attachment_refs: image_url.into_iter().collect(),
            file_name: None,
            audio_url,
            created_at: Utc::now(),
        };

        if let Err(e) = self.repo.insert_message(record).await {
            warn!(error = ?e, "Failed to persist assistant message");
            self.notifier.toast(
                NoticeLevel::Error,
                "Failed to save reply",
                Some(e.to_string()),
            );
        }
        if let Err(e) = self.repo.touch_chat(&chat_id).await {
            warn!(error = ?e, "Failed to update conversation timestamp");
        }
    }

    /// Resolve the target conversation, creating it on the first send.
    async fn ensure_chat(&self, outbound: &Message, model: &str) -> Result<String> {
        if let Some(active) = self.active_chat.lock().clone() {
            return Ok(active.id);
        }

        let name =
            crate::services::chat_namer::derive_chat_name(&outbound.plain_text(), outbound.attachment.as_ref());
        info!(name = %name, "Creating conversation");

        let record = self
            .repo
            .create_chat(NewChat {
                user_id: self.session.user_id.clone(),
                workspace_id: self.session.workspace_id.clone(),
                name,
                model: model.to_string(),
                embeddings_provider: self.session.embeddings_provider.clone(),
            })
            .await
            .context("Failed to create chat")?;

        let chat_id = record.id.clone();
        *self.active_chat.lock() = Some(ActiveChat {
            id: record.id,
            name: record.name,
        });
        Ok(chat_id)
    }

    fn record_from_message(
        &self,
        chat_id: &str,
        message: &Message,
        model: Option<&str>,
    ) -> MessageRecord {
        let sequence = self
            .history
            .lock()
            .index_of(&message.id)
            .unwrap_or_default() as i64;

        let (attachment_refs, file_name, audio_url) = match &message.attachment {
            Some(MessageAttachment::Image { uri }) => (vec![uri.clone()], None, None),
            Some(MessageAttachment::File { name, stored_path }) => (
                stored_path.clone().into_iter().collect(),
                Some(name.clone()),
                None,
            ),
            Some(MessageAttachment::Audio { uri, .. }) => (Vec::new(), None, Some(uri.clone())),
            None => (Vec::new(), None, None),
        };

        MessageRecord {
            id: message.id.clone(),
            chat_id: chat_id.to_string(),
            user_id: self.session.user_id.clone(),
            content: message.text.clone(),
            role: message.role,
            model: model.map(str::to_string),
            sequence_number: sequence,
            attachment_refs,
            file_name,
            audio_url,
            created_at: message.created_at,
        }
    }
}

/// Map local history into the wire shape, splicing retrieved context as a
/// system message immediately before the final user message.
fn build_api_history(messages: &[Message], context_text: &str) -> Vec<ApiMessage> {
    let mut wire: Vec<ApiMessage> = messages.iter().map(to_api_message).collect();

    if !context_text.is_empty() {
        let content = format!(
            "Here is relevant context from user-uploaded files:\n\n{context_text}\n\n\
             Based on this context, please answer the user's following message."
        );
        let insert_at = wire.len().saturating_sub(1);
        wire.insert(
            insert_at,
            ApiMessage {
                role: "system".to_string(),
                content: ApiContent::Text(content),
            },
        );
    }

    wire
}

fn to_api_message(message: &Message) -> ApiMessage {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
    .to_string();

    let mut text = message.text.trim().to_string();
    let mut image_uri = None;

    match &message.attachment {
        Some(MessageAttachment::File { name, .. }) => {
            let plain = message.plain_text();
            text = if plain.trim().is_empty() {
                format!("User uploaded a file: {name}. Analyze it.")
            } else {
                format!("{}\n\n[File attached: {name}]", plain.trim())
            };
        }
        Some(MessageAttachment::Image { uri }) => image_uri = Some(uri.clone()),
        _ => {}
    }

    match image_uri {
        Some(uri) => {
            let mut parts = Vec::new();
            if !text.is_empty() {
                parts.push(ContentPart::Text { text });
            }
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl { url: uri },
            });
            ApiMessage {
                role,
                content: ApiContent::Parts(parts),
            }
        }
        None => {
            if text.is_empty() {
                text = " ".to_string();
            }
            ApiMessage {
                role,
                content: ApiContent::Text(text),
            }
        }
    }
}
