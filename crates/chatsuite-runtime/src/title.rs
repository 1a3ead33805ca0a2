//! Chat title generation.

use chatsuite_core::models::DEFAULT_CHAT_TITLE;

use crate::gateway::{LanguageModel, complete};

/// Longest title kept, in characters.
pub const MAX_TITLE_CHARS: usize = 80;

const TITLE_PROMPT: &str = "Generate a short title based on the first message a user begins a conversation with. \
The title must be at most 80 characters long, summarize the user's message, \
and must not contain quotes or colons. Reply with the title only.";

/// Strip quotes and colons, collapse whitespace, cap the length.
///
/// An empty result becomes the default title.
pub fn sanitize_title(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | ':' | '`' | '\u{201c}' | '\u{201d}' | '\u{2018}' | '\u{2019}'))
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    let title = truncated.trim();
    if title.is_empty() {
        DEFAULT_CHAT_TITLE.to_string()
    } else {
        title.to_string()
    }
}

/// Best-effort title for a first message. Failures yield the default title.
pub async fn generate_title(model: &dyn LanguageModel, first_message: &str) -> String {
    match complete(model, TITLE_PROMPT, first_message).await {
        Ok(raw) => sanitize_title(&raw),
        Err(e) => {
            tracing::warn!(model = model.model_id(), "Title generation failed: {e}");
            DEFAULT_CHAT_TITLE.to_string()
        }
    }
}
