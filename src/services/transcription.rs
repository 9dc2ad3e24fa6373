use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Speech-to-text seam for finished voice recordings.
#[async_trait]
pub trait TranscriptionApi: Send + Sync {
    async fn transcribe(
        &self,
        token: &str,
        file_name: &str,
        audio: Vec<u8>,
        mime: &str,
    ) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Multipart `POST {base}/api/transcribe` client.
pub struct HttpTranscriptionClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTranscriptionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TranscriptionApi for HttpTranscriptionClient {
    async fn transcribe(
        &self,
        token: &str,
        file_name: &str,
        audio: Vec<u8>,
        mime: &str,
    ) -> Result<String> {
        debug!(file_name = %file_name, size = audio.len(), "Transcribing recording");

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .context("Invalid audio mime type")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/api/transcribe", self.base_url))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed to send")?;

        let status = response.status();
        let parsed: TranscribeResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;

        match parsed.text {
            Some(text) if status.is_success() => Ok(text),
            _ => {
                let message = parsed
                    .message
                    .unwrap_or_else(|| format!("transcription failed with status {}", status.as_u16()));
                anyhow::bail!(message)
            }
        }
    }
}
