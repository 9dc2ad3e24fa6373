use serde::{Deserialize, Serialize};

/// Authenticated session handed to the chat core at login.
///
/// Replaces ambient app-wide context lookup: every controller receives its
/// session explicitly and is torn down with it at logout. An expired or
/// missing token is a hard failure of the operation that needed it; the core
/// never re-authenticates on its own.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatSession {
    /// Bearer token attached to every backend call.
    pub access_token: String,
    /// Identity that owns conversations, uploads and messages.
    pub user_id: String,
    pub display_name: String,
    pub workspace_id: Option<String>,
    /// Model used when a send does not override it.
    pub selected_model: String,
    pub embeddings_provider: String,
    /// Backend origin, e.g. `https://www.rhynoai.ir`.
    pub base_url: String,
}

impl ChatSession {
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.user_id.is_empty()
    }

    /// First word of the display name with digits stripped, used for
    /// greeting copy in the shell.
    pub fn first_name(&self) -> String {
        let cleaned: String = self
            .display_name
            .chars()
            .filter(|c| !c.is_ascii_digit())
            .collect();
        cleaned
            .split(|c: char| c.is_whitespace() || matches!(c, '@' | ',' | '.' | ';'))
            .find(|part| !part.is_empty())
            .unwrap_or("")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(display_name: &str) -> ChatSession {
        ChatSession {
            access_token: "token".to_string(),
            user_id: "user-1".to_string(),
            display_name: display_name.to_string(),
            workspace_id: None,
            selected_model: "gpt-4o".to_string(),
            embeddings_provider: "openai".to_string(),
            base_url: "https://backend.example".to_string(),
        }
    }

    #[test]
    fn test_first_name_from_email() {
        assert_eq!(session("jane.doe42@example.com").first_name(), "jane");
    }

    #[test]
    fn test_first_name_from_display_name() {
        assert_eq!(session("Jane Doe").first_name(), "Jane");
    }

    #[test]
    fn test_validity_requires_token_and_identity() {
        let mut s = session("Jane");
        assert!(s.is_valid());
        s.access_token.clear();
        assert!(!s.is_valid());
    }
}
