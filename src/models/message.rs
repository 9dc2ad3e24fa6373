use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shown in place of an assistant reply whose stream delivered no text.
pub const NO_RESPONSE_FALLBACK: &str = "No response received.";

/// Annotation prefix used when a file substitutes for the message text.
const FILE_ONLY_PREFIX: &str = "File attached: ";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// At most one attachment per message.
///
/// A tagged union instead of marker tokens embedded in the text, so loading
/// and rendering never have to sniff base64 blobs out of message content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageAttachment {
    /// Inline `data:` URI or a remote storage path.
    Image { uri: String },
    File {
        name: String,
        /// Set once the upload completed; `None` for restored history where
        /// only the name survived.
        stored_path: Option<String>,
    },
    Audio { uri: String, duration_ms: u64 },
}

/// A single chat turn.
#[derive(Clone, Debug)]
pub struct Message {
    /// Locally minted entries use `user-<millis>` / `typing-<millis>`;
    /// server-issued ids pass through untouched.
    pub id: String,
    pub role: Role,
    pub text: String,
    /// Ordering key. The wire history is re-sorted by this, never by vector
    /// position, because edit and regenerate splice the local list.
    pub created_at: DateTime<Utc>,
    pub attachment: Option<MessageAttachment>,
    /// Placeholder still being filled by the stream reconciler. Never
    /// persisted.
    pub is_typing: bool,
    /// True only on the most recent optimistic user message until the full
    /// round trip completes.
    pub is_sending: bool,
}

impl Message {
    /// Optimistic outbound user message.
    pub fn user(text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("user-{}", now.timestamp_millis()),
            role: Role::User,
            text: text.into(),
            created_at: now,
            attachment: None,
            is_typing: false,
            is_sending: true,
        }
    }

    /// Empty assistant entry that the reconciler fills in.
    pub fn typing_placeholder() -> Self {
        let now = Utc::now();
        Self {
            id: format!("typing-{}", now.timestamp_millis()),
            role: Role::Assistant,
            text: String::new(),
            created_at: now,
            attachment: None,
            is_typing: true,
            is_sending: false,
        }
    }

    /// Completed assistant message, used for transcript turns that never go
    /// through the send pipeline.
    pub fn assistant(text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("assistant-{}", now.timestamp_millis()),
            role: Role::Assistant,
            text: text.into(),
            created_at: now,
            attachment: None,
            is_typing: false,
            is_sending: false,
        }
    }

    pub fn with_attachment(mut self, attachment: MessageAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn sent(mut self) -> Self {
        self.is_sending = false;
        self
    }

    /// The text the user actually typed, with any file annotation removed.
    ///
    /// The annotation is reconstructed from the typed attachment rather than
    /// parsed back out of free text, so stripping is exact.
    pub fn plain_text(&self) -> String {
        let Some(MessageAttachment::File { name, .. }) = &self.attachment else {
            return self.text.clone();
        };
        if self.text == file_only_annotation(name) {
            return String::new();
        }
        self.text
            .strip_suffix(&file_suffix_annotation(name))
            .unwrap_or(&self.text)
            .to_string()
    }
}

/// Outbound text for a send that attached `name` with no typed text.
pub fn file_only_annotation(name: &str) -> String {
    format!("{FILE_ONLY_PREFIX}{name}")
}

/// Suffix appended to typed text when a file rides along.
pub fn file_suffix_annotation(name: &str) -> String {
    format!("\n\n(File attached: {name})")
}

/// Merge typed text with the attachment-name annotation.
pub fn annotate_with_file(text: &str, name: &str) -> String {
    if text.is_empty() {
        file_only_annotation(name)
    } else {
        format!("{text}{}", file_suffix_annotation(name))
    }
}
