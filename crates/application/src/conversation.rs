//! Ordered chat history for one session.
//!
//! Messages are append-only, except that a model message being streamed is
//! rewritten in place. The streaming message is addressed by its id, so
//! anything appended after it (a notice, say) never gets overwritten.

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MessageId(Uuid);

impl MessageId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) -> MessageId {
        let id = MessageId::new();
        self.messages.push(Message {
            id,
            role,
            content: content.into(),
        });
        id
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> MessageId {
        self.push(Role::User, content)
    }

    pub fn push_model(&mut self, content: impl Into<String>) -> MessageId {
        self.push(Role::Model, content)
    }

    /// Rewrite the content of an existing message.
    ///
    /// Returns `false` if no message has this id.
    pub fn replace(&mut self, id: MessageId, content: impl Into<String>) -> bool {
        match self.messages.iter_mut().rev().find(|m| m.id == id) {
            Some(message) => {
                message.content = content.into();
                true
            }
            None => false,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_targets_message_by_id_not_position() {
        let mut conv = Conversation::new();
        conv.push_user("hi");
        let streaming = conv.push_model(" ");
        conv.push_model("Generation cancelled.");

        assert!(conv.replace(streaming, "Hello"));
        let contents: Vec<_> = conv.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "Hello", "Generation cancelled."]);
    }

    #[test]
    fn test_replace_unknown_id() {
        let mut other = Conversation::new();
        let foreign = other.push_model("x");

        let mut conv = Conversation::new();
        conv.push_user("hi");
        assert!(!conv.replace(foreign, "y"));
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        let mut conv = Conversation::new();
        let id = conv.push_model("ok");
        let message = conv.get(id).unwrap();
        assert_eq!(serde_json::to_value(message.role).unwrap(), "model");
    }
}
