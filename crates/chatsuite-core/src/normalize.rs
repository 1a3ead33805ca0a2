//! Conversion between the wire message shape and provider-neutral messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChatMessage, MessageContent, MessageRole};
use crate::parts::Part;

/// A message as submitted by the chat client.
///
/// `content` is either a string or an array of `{type, ...}` parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

impl WireMessage {
    pub fn new(role: impl Into<String>, content: Value) -> Self {
        Self {
            id: None,
            role: role.into(),
            content,
        }
    }
}

/// Drop messages with nothing to say and coerce odd content to strings.
///
/// Strings must contain non-whitespace. Arrays must contain a non-empty
/// text part or a tool call/result. Other JSON values are serialized to
/// a string; `null` is dropped.
pub fn validate_and_clean_messages(messages: Vec<WireMessage>) -> Vec<WireMessage> {
    messages
        .into_iter()
        .filter_map(|mut message| {
            let keep = match &message.content {
                Value::Null => false,
                Value::String(text) => !text.trim().is_empty(),
                Value::Array(items) => items.iter().any(wire_part_is_meaningful),
                other => {
                    let serialized = other.to_string();
                    message.content = Value::String(serialized);
                    true
                }
            };
            keep.then_some(message)
        })
        .collect()
}

fn wire_part_is_meaningful(part: &Value) -> bool {
    match part {
        Value::String(text) => !text.trim().is_empty(),
        Value::Object(obj) => match obj.get("type").and_then(Value::as_str) {
            Some("text") => obj
                .get("text")
                .and_then(Value::as_str)
                .is_some_and(|text| !text.trim().is_empty()),
            Some("tool-call" | "tool-result") => true,
            _ => false,
        },
        _ => false,
    }
}

/// Convert cleaned wire messages into provider-neutral messages.
///
/// Unknown roles and parts that do not parse are skipped.
pub fn to_chat_messages(messages: &[WireMessage]) -> Vec<ChatMessage> {
    messages.iter().filter_map(to_chat_message).collect()
}

/// Convert a single wire message.
pub fn to_chat_message(message: &WireMessage) -> Option<ChatMessage> {
    let role = MessageRole::from(message.role.as_str());
    if role == MessageRole::Other {
        return None;
    }

    let content = match &message.content {
        Value::String(text) => MessageContent::Text(text.clone()),
        Value::Array(items) => {
            let parts: Vec<Part> = items.iter().filter_map(wire_part).collect();
            if parts.is_empty() {
                return None;
            }
            MessageContent::Parts(parts)
        }
        Value::Null => return None,
        other => MessageContent::Text(other.to_string()),
    };

    if content.is_blank() {
        return None;
    }
    Some(ChatMessage { role, content })
}

fn wire_part(item: &Value) -> Option<Part> {
    if let Value::String(text) = item {
        return Some(Part::text(text.clone()));
    }
    let part: Part = serde_json::from_value(item.clone()).ok()?;
    part.is_meaningful().then_some(part)
}

/// Role/shape summary for logs, e.g. `user:text(5), assistant:parts(2)`.
///
/// Never includes message content.
pub fn describe_shape(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| match &message.content {
            MessageContent::Text(text) => format!("{}:text({})", message.role, text.len()),
            MessageContent::Parts(parts) => format!("{}:parts({})", message.role, parts.len()),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
