//! Tools the model can call during a turn.
//!
//! The set is closed: a call is parsed into a [`ToolCall`] variant with typed
//! arguments and dispatched by exhaustive match. Failures never escape a
//! tool; they come back as an `{error}` result the model can react to.

pub mod browse;
pub mod documents;

use std::sync::Arc;

use chatsuite_core::Database;
use chatsuite_core::config::WebConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::events::EventSink;
use crate::gateway::{LanguageModel, ToolCallRequest, ToolSpec};
use crate::web::WebResearch;

pub use browse::{BrowseResult, ScrapedPage};
pub use documents::DocumentResult;

/// Names of the available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    CreateDocument,
    UpdateDocument,
    BrowseInternet,
}

impl ToolName {
    pub const ALL: [ToolName; 3] = [
        ToolName::CreateDocument,
        ToolName::UpdateDocument,
        ToolName::BrowseInternet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::CreateDocument => "createDocument",
            ToolName::UpdateDocument => "updateDocument",
            ToolName::BrowseInternet => "browseInternet",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    /// Declaration sent to the provider.
    pub fn spec(self) -> ToolSpec {
        match self {
            ToolName::CreateDocument => ToolSpec {
                name: self.as_str(),
                description: "Create a document for writing or content creation activities. The document is shown to the user in a canvas next to the chat.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string", "description": "Title of the document"}
                    },
                    "required": ["title"]
                }),
            },
            ToolName::UpdateDocument => ToolSpec {
                name: self.as_str(),
                description: "Update an existing document with the given description of changes.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string", "description": "ID of the document to update"},
                        "description": {"type": "string", "description": "Description of the changes to make"}
                    },
                    "required": ["id", "description"]
                }),
            },
            ToolName::BrowseInternet => ToolSpec {
                name: self.as_str(),
                description: "Search the web and return the readable content of the top results.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Search query"}
                    },
                    "required": ["query"]
                }),
            },
        }
    }
}

/// Tools the model may call for a request. Browsing is opt-in.
pub fn active_tools(browse_enabled: bool) -> Vec<ToolName> {
    ToolName::ALL
        .into_iter()
        .filter(|tool| browse_enabled || *tool != ToolName::BrowseInternet)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateDocumentArgs {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdateDocumentArgs {
    pub id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrowseInternetArgs {
    pub query: String,
}

/// A parsed tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    CreateDocument(CreateDocumentArgs),
    UpdateDocument(UpdateDocumentArgs),
    BrowseInternet(BrowseInternetArgs),
}

impl ToolCall {
    pub fn parse(name: &str, args: &Value) -> Result<Self, ToolError> {
        let tool = ToolName::parse(name)
            .ok_or_else(|| ToolError::new(format!("Unknown tool '{name}'")))?;
        let invalid = |e: serde_json::Error| ToolError::new(format!("Invalid arguments for {name}: {e}"));
        Ok(match tool {
            ToolName::CreateDocument => {
                ToolCall::CreateDocument(serde_json::from_value(args.clone()).map_err(invalid)?)
            }
            ToolName::UpdateDocument => {
                ToolCall::UpdateDocument(serde_json::from_value(args.clone()).map_err(invalid)?)
            }
            ToolName::BrowseInternet => {
                ToolCall::BrowseInternet(serde_json::from_value(args.clone()).map_err(invalid)?)
            }
        })
    }

    pub fn name(&self) -> ToolName {
        match self {
            ToolCall::CreateDocument(_) => ToolName::CreateDocument,
            ToolCall::UpdateDocument(_) => ToolName::UpdateDocument,
            ToolCall::BrowseInternet(_) => ToolName::BrowseInternet,
        }
    }
}

/// In-band tool failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolError {
    pub error: String,
}

impl ToolError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Document(DocumentResult),
    Browse(BrowseResult),
    Error(ToolError),
}

impl ToolOutput {
    pub fn error(message: impl Into<String>) -> Self {
        ToolOutput::Error(ToolError::new(message))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutput::Error(_))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| json!({"error": e.to_string()}))
    }
}

/// Per-turn context handed to tools.
pub struct ToolContext<'a> {
    pub user_id: &'a str,
    pub sink: &'a EventSink,
    /// Model used for document content.
    pub model: &'a dyn LanguageModel,
    pub active: &'a [ToolName],
}

/// Executes tool calls against storage and the web.
pub struct ToolRegistry {
    db: Arc<Database>,
    web: Arc<dyn WebResearch>,
    max_results: usize,
    max_scraped_chars: usize,
}

impl ToolRegistry {
    pub fn new(db: Arc<Database>, web: Arc<dyn WebResearch>, config: &WebConfig) -> Self {
        Self {
            db,
            web,
            max_results: config.max_results,
            max_scraped_chars: config.max_scraped_chars,
        }
    }

    /// Declarations for the active tools.
    pub fn specs(active: &[ToolName]) -> Vec<ToolSpec> {
        active.iter().map(|tool| tool.spec()).collect()
    }

    pub async fn execute(&self, ctx: &ToolContext<'_>, request: &ToolCallRequest) -> ToolOutput {
        let call = match ToolCall::parse(&request.name, &request.args) {
            Ok(call) => call,
            Err(err) => {
                tracing::warn!(tool = %request.name, "Rejected tool call: {}", err.error);
                return ToolOutput::Error(err);
            }
        };
        if !ctx.active.contains(&call.name()) {
            return ToolOutput::error(format!("Tool {} is not enabled", call.name().as_str()));
        }

        tracing::debug!(tool = call.name().as_str(), id = %request.id, "Executing tool");
        match call {
            ToolCall::CreateDocument(args) => {
                documents::create_document(&self.db, ctx, &args).await
            }
            ToolCall::UpdateDocument(args) => {
                documents::update_document(&self.db, ctx, &args).await
            }
            ToolCall::BrowseInternet(args) => {
                browse::browse_internet(
                    self.web.as_ref(),
                    ctx.sink,
                    &args.query,
                    self.max_results,
                    self.max_scraped_chars,
                )
                .await
            }
        }
    }
}
