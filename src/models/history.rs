use std::sync::Arc;

use parking_lot::Mutex;

use super::message::{Message, Role};

/// History handle shared between the UI thread and spawned send tasks.
pub type SharedHistory = Arc<Mutex<MessageHistory>>;

pub fn shared_history() -> SharedHistory {
    Arc::new(Mutex::new(MessageHistory::new()))
}

/// Ordered message list for the active conversation.
///
/// Single source of truth for what the shell renders. Updates are
/// last-write-wins per message id; list order is `created_at` ascending
/// (the sort is stable, so entries minted in the same millisecond keep
/// insertion order).
#[derive(Default)]
pub struct MessageHistory {
    messages: Vec<Message>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Replace the whole list, e.g. after loading a conversation.
    pub fn replace_all(&mut self, mut messages: Vec<Message>) {
        messages.sort_by_key(|m| m.created_at);
        self.messages = messages;
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append the outbound user message and its typing placeholder in one
    /// update. No intermediate state ever shows one without the other.
    pub fn push_pair(&mut self, outbound: Message, placeholder: Message) {
        self.messages.push(outbound);
        self.messages.push(placeholder);
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    pub fn message_at(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    /// Last-write-wins update by id. Returns false when the id is unknown.
    pub fn update<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                f(message);
                true
            }
            None => false,
        }
    }

    pub fn set_text(&mut self, id: &str, text: &str) -> bool {
        self.update(id, |m| m.text = text.to_string())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }

    /// Drop the message at `index` and everything after it.
    pub fn truncate_from(&mut self, index: usize) {
        self.messages.truncate(index);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn has_typing_placeholder(&self) -> bool {
        self.messages.iter().any(|m| m.is_typing)
    }

    pub fn clear_sending_flags(&mut self) {
        for message in &mut self.messages {
            message.is_sending = false;
        }
    }

    /// The user message immediately before `index`, if there is one and it
    /// really is a user turn.
    pub fn preceding_user(&self, index: usize) -> Option<&Message> {
        let prev = self.messages.get(index.checked_sub(1)?)?;
        (prev.role == Role::User && !prev.is_typing).then_some(prev)
    }

    /// History as sent to the completion API: placeholders dropped, sorted
    /// by `created_at` regardless of insertion order.
    pub fn api_history(&self) -> Vec<Message> {
        let mut history: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| !m.is_typing)
            .cloned()
            .collect();
        history.sort_by_key(|m| m.created_at);
        history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn at_offset(mut message: Message, seconds: i64) -> Message {
        message.created_at = Utc::now() + Duration::seconds(seconds);
        message
    }

    #[test]
    fn test_api_history_sorts_by_created_at_not_position() {
        let mut history = MessageHistory::new();
        // Simulate a regenerated message spliced in with an earlier
        // timestamp than its array position implies.
        history.push(at_offset(Message::user("first"), 0));
        history.push(at_offset(Message::assistant("second"), 10));
        history.push(at_offset(Message::user("edited"), 5));

        let api = history.api_history();
        let texts: Vec<&str> = api.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "edited", "second"]);
    }

    #[test]
    fn test_api_history_drops_typing_placeholders() {
        let mut history = MessageHistory::new();
        history.push_pair(Message::user("hello"), Message::typing_placeholder());
        let api = history.api_history();
        assert_eq!(api.len(), 1);
        assert_eq!(api[0].text, "hello");
    }

    #[test]
    fn test_update_is_last_write_wins_by_id() {
        let mut history = MessageHistory::new();
        let placeholder = Message::typing_placeholder();
        let id = placeholder.id.clone();
        history.push(placeholder);

        assert!(history.set_text(&id, "partial"));
        assert!(history.set_text(&id, "final"));
        assert_eq!(history.get(&id).unwrap().text, "final");
        assert!(!history.set_text("missing", "x"));
    }

    #[test]
    fn test_truncate_from_drops_tail() {
        let mut history = MessageHistory::new();
        history.push(Message::user("a"));
        history.push(Message::assistant("b"));
        history.push(Message::user("c"));
        history.truncate_from(1);
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].text, "a");
    }

    #[test]
    fn test_preceding_user_requires_user_role() {
        let mut history = MessageHistory::new();
        history.push(Message::assistant("a"));
        history.push(Message::assistant("b"));
        assert!(history.preceding_user(1).is_none());
        assert!(history.preceding_user(0).is_none());

        let mut history = MessageHistory::new();
        history.push(Message::user("question"));
        history.push(Message::assistant("answer"));
        assert_eq!(history.preceding_user(1).unwrap().text, "question");
    }

    #[test]
    fn test_pair_append_keeps_relative_order_on_equal_timestamps() {
        let mut history = MessageHistory::new();
        let user = Message::user("hi");
        let mut placeholder = Message::typing_placeholder();
        placeholder.created_at = user.created_at;
        history.push_pair(user, placeholder);

        let api_all: Vec<Message> = {
            let mut all = history.snapshot();
            all.sort_by_key(|m| m.created_at);
            all
        };
        assert_eq!(api_all[0].role, Role::User);
        assert_eq!(api_all[1].role, Role::Assistant);
    }
}
