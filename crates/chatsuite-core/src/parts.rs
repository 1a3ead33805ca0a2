//! Typed message parts for structured content.
//!
//! Assistant messages hold text and tool-call parts in generation order;
//! tool messages hold tool-result parts. The storage layer keeps parts as
//! a JSON array next to a plain-text projection of the message, so rows
//! stay readable without decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChatMessage, MessageContent, MessageRole};

/// A content part within a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    /// Plain text or markdown content.
    Text { text: String },

    /// A tool call requested by the model.
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default)]
        args: Value,
    },

    /// The outcome of executing a tool call.
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default)]
        result: Value,
    },
}

impl Part {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool call part.
    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Value,
    ) -> Self {
        Self::ToolCall {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
        }
    }

    /// Create a tool result part.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: Value,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result,
        }
    }

    /// Text of a text part.
    pub fn text_content(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Non-empty text, or any tool call/result.
    pub fn is_meaningful(&self) -> bool {
        match self {
            Self::Text { text } => !text.trim().is_empty(),
            Self::ToolCall { .. } | Self::ToolResult { .. } => true,
        }
    }
}

/// Storage form of a message: text projection plus the parts array.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredContent {
    pub content: String,
    pub parts_json: Value,
}

/// Flatten a message for storage.
///
/// User text is kept verbatim with an empty parts array. Structured
/// content keeps every part in order in `parts_json`; user content is
/// additionally JSON-serialized into `content`, assistant and tool
/// content get a readable projection.
pub fn format_for_storage(message: &ChatMessage) -> StoredContent {
    match (&message.role, &message.content) {
        (_, MessageContent::Text(text)) => StoredContent {
            content: text.clone(),
            parts_json: Value::Array(Vec::new()),
        },
        (MessageRole::User, MessageContent::Parts(parts)) => {
            let parts_json = serde_json::to_value(parts).unwrap_or_else(|_| Value::Array(Vec::new()));
            StoredContent {
                content: parts_json.to_string(),
                parts_json,
            }
        }
        (_, MessageContent::Parts(parts)) => StoredContent {
            content: project_content(parts),
            parts_json: serde_json::to_value(parts).unwrap_or_else(|_| Value::Array(Vec::new())),
        },
    }
}

/// Rebuild message content from its stored form.
pub fn parse_stored(content: &str, parts_json: &Value) -> MessageContent {
    match parts_json {
        Value::Array(items) if !items.is_empty() => {
            let parts: Vec<Part> = items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect();
            if parts.is_empty() {
                MessageContent::Text(content.to_string())
            } else {
                MessageContent::Parts(parts)
            }
        }
        _ => MessageContent::Text(content.to_string()),
    }
}

fn project_content(parts: &[Part]) -> String {
    const MAX_CHARS: usize = 4000;

    let mut lines = Vec::new();
    let mut total_chars = 0usize;
    for part in parts {
        let line = match part {
            Part::Text { text } => text.trim().to_string(),
            Part::ToolCall { tool_name, .. } => format!("[tool call: {tool_name}]"),
            Part::ToolResult { tool_name, .. } => format!("[tool result: {tool_name}]"),
        };
        if line.is_empty() {
            continue;
        }
        total_chars += line.chars().count();
        lines.push(line);
        if total_chars > MAX_CHARS {
            break;
        }
    }
    lines.join("\n\n")
}
