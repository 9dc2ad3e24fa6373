use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Blob upload seam for the hosted file-storage function.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Upload `bytes` to the caller-chosen `path`, returning the stored
    /// path the backend acknowledged.
    async fn upload(&self, token: &str, path: &str, bytes: Vec<u8>, mime: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Client for the file-uploader edge function: raw body, bearer auth, the
/// destination path in an `X-File-Path` header.
pub struct HttpFileStorage {
    client: reqwest::Client,
    uploader_url: String,
}

impl HttpFileStorage {
    pub fn new(uploader_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            uploader_url: uploader_url.into(),
        }
    }
}

#[async_trait]
impl FileStorage for HttpFileStorage {
    async fn upload(&self, token: &str, path: &str, bytes: Vec<u8>, mime: &str) -> Result<String> {
        debug!(path = %path, size = bytes.len(), "Uploading file");
        let response = self
            .client
            .post(&self.uploader_url)
            .bearer_auth(token)
            .header("Content-Type", mime)
            .header("X-File-Path", path)
            .body(bytes)
            .send()
            .await
            .context("Upload request failed to send")?;

        let status = response.status();
        let body: UploadResponse = response
            .json()
            .await
            .unwrap_or(UploadResponse { error: None });

        if !status.is_success() {
            let message = body
                .error
                .unwrap_or_else(|| format!("upload failed with status {}", status.as_u16()));
            anyhow::bail!(message);
        }

        Ok(path.to_string())
    }
}
