use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Models that answer with a single JSON payload instead of a text stream.
/// The reconciler mode is chosen from this list up front, never inferred
/// from the response.
const SINGLE_SHOT_MODELS: &[&str] = &[
    "gpt-4o-mini-tts",
    "dall-e-3",
    "gpt-5",
    "gpt-5-mini",
    "gpt-4o-transcribe",
];

/// Model whose transcript is shown directly instead of being sent on.
pub const TRANSCRIBE_ONLY_MODEL: &str = "gpt-4o-transcribe";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelMode {
    Streaming,
    SingleShot,
}

pub fn model_mode(model_id: &str) -> ModelMode {
    if SINGLE_SHOT_MODELS.contains(&model_id) {
        ModelMode::SingleShot
    } else {
        ModelMode::Streaming
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSettings {
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Message content is a bare string unless an image forces the multi-part
/// form.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ApiContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: ApiContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    #[serde(rename = "chatSettings")]
    pub chat_settings: ChatSettings,
    pub messages: Vec<ApiMessage>,
    #[serde(rename = "enableWebSearch")]
    pub enable_web_search: bool,
    pub chat_id: String,
    /// The client persists its own user message before dispatching.
    pub is_user_message_saved: bool,
}

/// Response body of a single-shot model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionPayload {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "imageUrl")]
    pub image_url: Option<String>,
    #[serde(default, rename = "audioUrl")]
    pub audio_url: Option<String>,
}

/// Stream chunks emitted during responses.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    Done,
    Error(String),
}

/// Type alias for response streams.
pub type ResponseStream = BoxStream<'static, Result<StreamChunk>>;

/// Remote completion endpoint, in both delivery modes.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn stream(&self, token: &str, request: CompletionRequest) -> Result<ResponseStream>;
    async fn complete(&self, token: &str, request: CompletionRequest)
    -> Result<CompletionPayload>;
}

/// `POST {base}/api/chat/openai` client.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCompletionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat/openai", self.base_url)
    }

    async fn dispatch(&self, token: &str, request: &CompletionRequest) -> Result<reqwest::Response> {
        debug!(model = %request.chat_settings.model, chat_id = %request.chat_id, "Dispatching completion request");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .context("Completion request failed to send")?;

        let status = response.status();
        if !status.is_success() {
            // Raw server text is kept so the failure message in history is
            // diagnosable.
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Server error {}: {}", status.as_u16(), body);
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionApi for HttpCompletionClient {
    async fn stream(&self, token: &str, request: CompletionRequest) -> Result<ResponseStream> {
        let response = self.dispatch(token, &request).await?;
        let mut bytes = response.bytes_stream();

        let stream: ResponseStream = Box::pin(async_stream::stream! {
            // Carry buffer for multi-byte characters split across chunks.
            let mut pending: Vec<u8> = Vec::new();
            while let Some(item) = bytes.next().await {
                match item {
                    Ok(chunk) => {
                        pending.extend_from_slice(&chunk);
                        if let Some(text) = drain_valid_utf8(&mut pending) {
                            yield Ok(StreamChunk::Text(text));
                        }
                    }
                    Err(e) => {
                        yield Ok(StreamChunk::Error(e.to_string()));
                        return;
                    }
                }
            }
            if !pending.is_empty() {
                yield Ok(StreamChunk::Text(String::from_utf8_lossy(&pending).into_owned()));
            }
            yield Ok(StreamChunk::Done);
        });

        Ok(stream)
    }

    async fn complete(
        &self,
        token: &str,
        request: CompletionRequest,
    ) -> Result<CompletionPayload> {
        let response = self.dispatch(token, &request).await?;
        response
            .json::<CompletionPayload>()
            .await
            .context("Failed to parse completion response")
    }
}

/// Take the longest valid UTF-8 prefix out of `pending`, leaving any
/// trailing partial character for the next chunk.
fn drain_valid_utf8(pending: &mut Vec<u8>) -> Option<String> {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) => e.valid_up_to(),
    };
    if valid == 0 {
        return None;
    }
    let text = String::from_utf8(pending.drain(..valid).collect())
        .unwrap_or_default();
    (!text.is_empty()).then_some(text)
}
