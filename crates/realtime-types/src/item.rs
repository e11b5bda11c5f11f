//! Conversation items carried by `conversation.item.create`.

use serde::{Deserialize, Serialize};

/// Speaker of a conversation message.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single piece of message content.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text authored on the client side (user or system context).
    InputText { text: String },
    /// Plain text, used for assistant answers injected by the client.
    Text { text: String },
}

impl ContentPart {
    pub fn text(&self) -> &str {
        match self {
            ContentPart::InputText { text } | ContentPart::Text { text } => text,
        }
    }
}

/// An item appended to the remote conversation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    /// A message from one of the conversation roles.
    Message {
        role: Role,
        content: Vec<ContentPart>,
    },
    /// The result of a function call previously requested by the model.
    FunctionCallOutput { call_id: String, output: String },
}

impl ConversationItem {
    /// A message with a single text part. System and user context use
    /// `input_text`, assistant answers use `text`.
    pub fn text_message(role: Role, text: impl Into<String>) -> Self {
        let text = text.into();
        let part = match role {
            Role::Assistant => ContentPart::Text { text },
            Role::User | Role::System => ContentPart::InputText { text },
        };
        ConversationItem::Message {
            role,
            content: vec![part],
        }
    }
}
