use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Uploaded file handed to the indexing step.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessableFile {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    pub file_path: String,
    pub embeddings_provider: String,
}

/// Retrieval seam: index an uploaded file, then pull ranked snippets for a
/// prompt.
#[async_trait]
pub trait RetrievalApi: Send + Sync {
    /// Convert an uploaded file into retrievable content. Returns the file
    /// reference used by later `retrieve` calls.
    async fn process_file(&self, token: &str, file: &ProcessableFile) -> Result<String>;

    /// Ranked snippets for `user_input` over the given file references,
    /// concatenated as one context block. Empty when nothing matched.
    async fn retrieve(&self, token: &str, user_input: &str, file_ids: &[String])
    -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    file_id: String,
}

#[derive(Debug, Serialize)]
struct RetrieveRequest<'a> {
    #[serde(rename = "userInput")]
    user_input: &'a str,
    #[serde(rename = "fileIds")]
    file_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct FileItem {
    content: String,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default, rename = "fileItems")]
    file_items: Vec<FileItem>,
}

pub struct HttpRetrievalClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRetrievalClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl RetrievalApi for HttpRetrievalClient {
    async fn process_file(&self, token: &str, file: &ProcessableFile) -> Result<String> {
        debug!(name = %file.name, path = %file.file_path, "Processing uploaded file");
        let response = self
            .client
            .post(format!("{}/api/retrieval/process", self.base_url))
            .bearer_auth(token)
            .json(file)
            .send()
            .await
            .context("File processing request failed to send")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("File processing failed ({}): {}", status.as_u16(), body);
        }

        let parsed: ProcessResponse = response
            .json()
            .await
            .context("Failed to parse file processing response")?;
        Ok(parsed.file_id)
    }

    async fn retrieve(
        &self,
        token: &str,
        user_input: &str,
        file_ids: &[String],
    ) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/retrieval/retrieve", self.base_url))
            .bearer_auth(token)
            .json(&RetrieveRequest {
                user_input,
                file_ids,
            })
            .send()
            .await
            .context("Retrieval request failed to send")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Retrieval failed ({}): {}", status.as_u16(), body);
        }

        let parsed: RetrieveResponse = response
            .json()
            .await
            .context("Failed to parse retrieval response")?;
        let context_text = parsed
            .file_items
            .into_iter()
            .map(|item| item.content)
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(context_text)
    }
}
