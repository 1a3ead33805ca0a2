//! Domain models for chats, messages, credits and uploads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parts::Part;

/// Title every chat starts with until a generated one replaces it.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// A user profile with its credit balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: Option<String>,
    pub credits: i64,
    pub created_at: DateTime<Utc>,
}

/// A chat session owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    /// Whether the chat still carries the placeholder title.
    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_CHAT_TITLE
    }
}

/// A persisted message within a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
}

/// Message roles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
            MessageRole::Other => write!(f, "other"),
        }
    }
}

impl From<&str> for MessageRole {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "user" | "human" => MessageRole::User,
            "assistant" | "ai" => MessageRole::Assistant,
            "system" => MessageRole::System,
            "tool" | "function" => MessageRole::Tool,
            _ => MessageRole::Other,
        }
    }
}

/// Message content: plain text or an ordered list of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Part>),
}

impl MessageContent {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(Part::text_content)
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Parts view; plain text becomes a single text part.
    pub fn parts(&self) -> Vec<Part> {
        match self {
            MessageContent::Text(text) => vec![Part::text(text.clone())],
            MessageContent::Parts(parts) => parts.clone(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.trim().is_empty(),
            MessageContent::Parts(parts) => !parts.iter().any(Part::is_meaningful),
        }
    }
}

/// Provider-neutral message handed to model clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(parts: Vec<Part>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn tool(parts: Vec<Part>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: MessageContent::Parts(parts),
        }
    }
}

/// A canvas document produced by the document tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// An uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttachment {
    pub id: String,
    pub chat_id: String,
    pub user_id: String,
    pub name: String,
    /// Storage location of the raw bytes.
    pub path: String,
    pub content_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

/// A chunk of text extracted from an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunk {
    pub id: String,
    pub file_id: String,
    pub idx: i64,
    pub content: String,
    pub metadata: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
}

/// Upload with its extracted chunks (for prompt context).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileWithChunks {
    #[serde(flatten)]
    pub file: FileAttachment,
    pub chunks: Vec<FileChunk>,
}

/// Credits charged for a turn and the balance left afterwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreditUsage {
    pub cost: i64,
    pub remaining: i64,
}

impl CreditUsage {
    /// JSON form used in the `x-credit-usage` response header.
    pub fn header_value(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Generate a fresh identifier for server-created rows.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
