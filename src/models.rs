/// Request wire types for the gateway's two endpoints.
///
/// The chat endpoint accepts the UI-message shape (messages made of typed
/// parts); the message endpoint accepts a single-turn `{ "message": ... }`
/// body. Both are deserialized from JSON that has already passed the
/// validator, so the types here carry no constraint logic themselves.
use serde::{Deserialize, Serialize};

/// The author of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One part of a chat message.
///
/// A closed set: text carries the payload, the step markers carry none.
/// Unknown part types are rejected by the validator rather than ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessagePart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "step-start")]
    StepStart,
    #[serde(rename = "step-end")]
    StepEnd,
}

/// A single message in the chat form's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    /// May be empty; each text part inside is 1..=2000 chars.
    pub parts: Vec<MessagePart>,
}

impl ChatMessage {
    /// Flatten the message to the backend's plain content string: text parts
    /// concatenated in order, step markers dropped.
    pub fn flatten_text(&self) -> String {
        let mut content = String::new();
        for part in &self.parts {
            if let MessagePart::Text { text } = part {
                content.push_str(text);
            }
        }
        content
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

/// Body of `POST /api/message`, the single-turn form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleMessageRequest {
    /// Kept exactly as sent, surrounding whitespace included. Emptiness is
    /// judged on the trimmed value; the preserved original flows downstream.
    pub message: String,
}
