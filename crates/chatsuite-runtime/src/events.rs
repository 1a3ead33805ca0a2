//! Events streamed to the client during a chat turn.

use chatsuite_core::models::CreditUsage;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// One event on the turn stream.
///
/// Content deltas and status updates share the channel; `Done` is the only
/// terminal success event and is sent after the turn is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    Status {
        message: String,
    },
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        args: Value,
    },
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        result: Value,
    },
    DocumentId {
        id: String,
    },
    DocumentTitle {
        title: String,
    },
    DocumentClear,
    DocumentTextDelta {
        text: String,
    },
    DocumentFinish,
    MessageId {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    Error {
        message: String,
    },
    Done {
        #[serde(rename = "messageIds")]
        message_ids: Vec<String>,
        credits: CreditUsage,
    },
}

impl StreamEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::TextDelta { .. } => "text-delta",
            StreamEvent::Status { .. } => "status",
            StreamEvent::ToolCall { .. } => "tool-call",
            StreamEvent::ToolResult { .. } => "tool-result",
            StreamEvent::DocumentId { .. } => "document-id",
            StreamEvent::DocumentTitle { .. } => "document-title",
            StreamEvent::DocumentClear => "document-clear",
            StreamEvent::DocumentTextDelta { .. } => "document-text-delta",
            StreamEvent::DocumentFinish => "document-finish",
            StreamEvent::MessageId { .. } => "message-id",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done { .. } => "done",
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        StreamEvent::Status {
            message: message.into(),
        }
    }
}

/// Sending half of a turn stream.
///
/// Sends never fail: once the client is gone events are dropped and the
/// turn's cancellation token takes care of stopping work.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: StreamEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Dropping stream event; receiver closed");
        }
    }

    pub fn text_delta(&self, text: &str) {
        self.emit(StreamEvent::TextDelta {
            text: text.to_string(),
        });
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(StreamEvent::status(message));
    }
}
