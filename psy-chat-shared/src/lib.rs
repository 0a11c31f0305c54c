use serde::{Deserialize, Serialize};

/// Name of the only event carried by the channel.
pub const CHAT_MESSAGE_EVENT: &str = "chat message";

/// Text broadcast as the AI reply when the completion call fails for any reason.
pub const AI_ERROR_TEXT: &str = "Произошла ошибка при обращении к AI.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Author {
    You,
    #[serde(rename = "AI")]
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user: Author,
    pub text: String,
}

impl ChatMessage {
    pub fn you(text: impl Into<String>) -> Self {
        Self {
            user: Author::You,
            text: text.into(),
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            user: Author::Ai,
            text: text.into(),
        }
    }

    pub fn is_ai(&self) -> bool {
        self.user == Author::Ai
    }
}

/// Event from client to server. Encoded as `{"event": "chat message", "data": "<text>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "chat message")]
    ChatMessage(String),
}

/// Event from server to every client. Encoded as
/// `{"event": "chat message", "data": {"user": "...", "text": "..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "chat message")]
    ChatMessage(ChatMessage),
}

impl ServerEvent {
    pub fn chat(message: ChatMessage) -> Self {
        ServerEvent::ChatMessage(message)
    }
}
