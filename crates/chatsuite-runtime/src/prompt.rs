//! System prompt composition.

use chatsuite_core::models::FileWithChunks;

const PERSONA: &str = "You are ChatSuite, a friendly and knowledgeable assistant. \
Keep answers clear and concise, use Markdown where it helps readability, \
and say so when you are unsure instead of guessing.";

const CANVAS: &str = "Canvas is a side panel next to the conversation where documents are shown. \
Use `createDocument` for substantial content the user will want to keep or edit \
(essays, emails, code files, plans) and `updateDocument` when asked to change an existing \
document, passing its id. Do not use the canvas for short conversational answers, and do not \
repeat a document's content in chat after creating it.";

const BROWSING: &str = "Web browsing is enabled. For questions about current events, \
recent releases or anything that may have changed after your training data, call \
`browseInternet` first, then answer from the returned content and cite the source URLs.";

/// Inputs to the system prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptOptions<'a> {
    pub browse_enabled: bool,
    pub latest_file: Option<&'a FileWithChunks>,
    /// Characters of the latest upload to include.
    pub file_context_chars: usize,
}

/// Persona plus the conditional canvas, browsing and upload sections.
pub fn system_prompt(options: &PromptOptions<'_>) -> String {
    let mut sections = vec![PERSONA.to_string(), CANVAS.to_string()];
    if options.browse_enabled {
        sections.push(BROWSING.to_string());
    }
    if let Some(file) = options.latest_file
        && let Some(block) = file_context(file, options.file_context_chars)
    {
        sections.push(block);
    }
    sections.join("\n\n")
}

fn file_context(file: &FileWithChunks, max_chars: usize) -> Option<String> {
    let mut excerpt = String::new();
    for chunk in &file.chunks {
        if excerpt.chars().count() >= max_chars {
            break;
        }
        if !excerpt.is_empty() {
            excerpt.push('\n');
        }
        excerpt.push_str(chunk.content.trim());
    }
    let excerpt: String = excerpt.chars().take(max_chars).collect();
    if excerpt.trim().is_empty() {
        return None;
    }

    Some(format!(
        "The user recently uploaded a file named \"{}\" ({}). Use it as context when relevant.\n<file>\n{}\n</file>",
        file.file.name, file.file.content_type, excerpt
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsuite_core::models::{FileAttachment, FileChunk};
    use chrono::Utc;

    fn upload(texts: &[&str]) -> FileWithChunks {
        FileWithChunks {
            file: FileAttachment {
                id: "f1".to_string(),
                chat_id: "c1".to_string(),
                user_id: "u1".to_string(),
                name: "notes.txt".to_string(),
                path: "u1/f1.txt".to_string(),
                content_type: "text/plain".to_string(),
                size: 10,
                created_at: Utc::now(),
            },
            chunks: texts
                .iter()
                .enumerate()
                .map(|(idx, text)| FileChunk {
                    id: format!("k{idx}"),
                    file_id: "f1".to_string(),
                    idx: i64::try_from(idx).unwrap_or_default(),
                    content: (*text).to_string(),
                    metadata: serde_json::json!({}),
                    embedding: None,
                })
                .collect(),
        }
    }

    #[test]
    fn browsing_section_is_conditional() {
        let without = system_prompt(&PromptOptions::default());
        let with = system_prompt(&PromptOptions {
            browse_enabled: true,
            ..PromptOptions::default()
        });
        assert!(without.contains("createDocument"));
        assert!(!without.contains("browseInternet"));
        assert!(with.contains("browseInternet"));
    }

    #[test]
    fn includes_latest_upload_excerpt() {
        let file = upload(&["first chunk", "second chunk"]);
        let prompt = system_prompt(&PromptOptions {
            latest_file: Some(&file),
            file_context_chars: 15,
            ..PromptOptions::default()
        });
        assert!(prompt.contains("notes.txt"));
        assert!(prompt.contains("first chunk\nsec"));
        assert!(!prompt.contains("second chunk"));
    }

    #[test]
    fn empty_upload_adds_nothing() {
        let file = upload(&["   "]);
        let prompt = system_prompt(&PromptOptions {
            latest_file: Some(&file),
            file_context_chars: 100,
            ..PromptOptions::default()
        });
        assert!(!prompt.contains("<file>"));
    }
}
