use crate::models::message::MessageAttachment;

pub const DEFAULT_CHAT_NAME: &str = "New chat";
pub const IMAGE_CHAT_NAME: &str = "Image chat";
pub const VOICE_CHAT_NAME: &str = "Voice chat";

/// Words of the first outbound message kept as the conversation name.
const NAME_WORD_LIMIT: usize = 5;

const NAME_CHAR_LIMIT: usize = 100;

/// Derive the conversation name from the first outbound content.
///
/// Fixed at creation time; conversations are never renamed afterward.
pub fn derive_chat_name(text: &str, attachment: Option<&MessageAttachment>) -> String {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        let name = trimmed
            .split_whitespace()
            .take(NAME_WORD_LIMIT)
            .collect::<Vec<_>>()
            .join(" ");
        return clean_name(&name);
    }

    match attachment {
        Some(MessageAttachment::File { name, .. }) => clean_name(name),
        Some(MessageAttachment::Image { .. }) => IMAGE_CHAT_NAME.to_string(),
        Some(MessageAttachment::Audio { .. }) => VOICE_CHAT_NAME.to_string(),
        None => DEFAULT_CHAT_NAME.to_string(),
    }
}

/// Clean and bound a derived name.
fn clean_name(raw: &str) -> String {
    let cleaned = raw
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .lines()
        .next()
        .unwrap_or(DEFAULT_CHAT_NAME)
        .trim()
        .to_string();

    if cleaned.is_empty() {
        DEFAULT_CHAT_NAME.to_string()
    } else if cleaned.chars().count() > NAME_CHAR_LIMIT {
        let head: String = cleaned.chars().take(NAME_CHAR_LIMIT - 3).collect();
        format!("{head}...")
    } else {
        cleaned
    }
}
