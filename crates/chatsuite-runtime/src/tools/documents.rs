//! Canvas document tools.

use chatsuite_core::Database;
use chatsuite_core::models::{ChatMessage, Document, generate_id};
use chrono::Utc;
use serde::Serialize;

use super::{CreateDocumentArgs, ToolContext, ToolOutput, UpdateDocumentArgs};
use crate::events::StreamEvent;
use crate::gateway::TurnRequest;

const CREATE_PROMPT: &str = "Write about the given topic. Markdown is supported. Use headings wherever appropriate.";
const UPDATE_PROMPT: &str = "Improve the following contents of the document based on the given prompt.";

/// Confirmation returned to the model; the content itself stays out of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentResult {
    pub id: String,
    pub title: String,
    pub message: String,
}

pub async fn create_document(
    db: &Database,
    ctx: &ToolContext<'_>,
    args: &CreateDocumentArgs,
) -> ToolOutput {
    let id = generate_id();
    ctx.sink.status("Creating document...");
    ctx.sink.emit(StreamEvent::DocumentId { id: id.clone() });
    ctx.sink.emit(StreamEvent::DocumentTitle {
        title: args.title.clone(),
    });
    ctx.sink.emit(StreamEvent::DocumentClear);

    let content = match write_content(ctx, CREATE_PROMPT, &args.title).await {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Document generation failed: {e}");
            return ToolOutput::error(format!("Failed to create document: {e}"));
        }
    };
    ctx.sink.emit(StreamEvent::DocumentFinish);

    let document = Document {
        id: id.clone(),
        user_id: ctx.user_id.to_string(),
        title: args.title.clone(),
        content,
        created_at: Utc::now(),
    };
    if let Err(e) = db.insert_document(&document).await {
        tracing::error!("Failed to save document {id}: {e}");
        return ToolOutput::error("Failed to save document");
    }

    ToolOutput::Document(DocumentResult {
        id,
        title: args.title.clone(),
        message: "A document was created and is now visible to the user.".to_string(),
    })
}

pub async fn update_document(
    db: &Database,
    ctx: &ToolContext<'_>,
    args: &UpdateDocumentArgs,
) -> ToolOutput {
    let document = match db.get_document(&args.id).await {
        Ok(Some(doc)) if doc.user_id == ctx.user_id => doc,
        Ok(_) => return ToolOutput::error("Document not found"),
        Err(e) => {
            tracing::error!("Failed to load document {}: {e}", args.id);
            return ToolOutput::error("Failed to load document");
        }
    };
    if document.content.trim().is_empty() {
        return ToolOutput::error("Document has no content to update");
    }

    ctx.sink.status("Updating document...");
    ctx.sink.emit(StreamEvent::DocumentId {
        id: document.id.clone(),
    });
    ctx.sink.emit(StreamEvent::DocumentTitle {
        title: document.title.clone(),
    });
    ctx.sink.emit(StreamEvent::DocumentClear);

    let system = format!("{UPDATE_PROMPT}\n\n{}", document.content);
    let content = match write_content(ctx, &system, &args.description).await {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Document update generation failed: {e}");
            return ToolOutput::error(format!("Failed to update document: {e}"));
        }
    };
    ctx.sink.emit(StreamEvent::DocumentFinish);

    if let Err(e) = db.update_document_content(&document.id, &content).await {
        tracing::error!("Failed to save document {}: {e}", document.id);
        return ToolOutput::error("Failed to save document");
    }

    ToolOutput::Document(DocumentResult {
        id: document.id,
        title: document.title,
        message: "The document has been updated successfully.".to_string(),
    })
}

/// Stream document content from the model as document text deltas.
async fn write_content(
    ctx: &ToolContext<'_>,
    system: &str,
    prompt: &str,
) -> chatsuite_core::Result<String> {
    let request = TurnRequest {
        system: system.to_string(),
        messages: vec![ChatMessage::user(prompt)],
        tools: Vec::new(),
    };
    let sink = ctx.sink.clone();
    let output = ctx
        .model
        .stream_turn(&request, &mut |delta: &str| {
            sink.emit(StreamEvent::DocumentTextDelta {
                text: delta.to_string(),
            });
        })
        .await?;
    Ok(output.text)
}
