//! Upload ingestion: validate, store, extract, chunk, embed, index.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chatsuite_core::config::UploadConfig;
use chatsuite_core::extract::{FileKind, chunk_text, extract_text, validate_upload};
use chatsuite_core::models::{
    Chat, DEFAULT_CHAT_TITLE, FileAttachment, FileChunk, Profile, generate_id,
};
use chatsuite_core::{Database, Error, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::embeddings::Embedder;

/// Where an upload was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub url: String,
    pub path: String,
}

/// A file as received from the client.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub chat_id: String,
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub struct UploadService {
    db: Arc<Database>,
    embedder: Option<Arc<dyn Embedder>>,
    uploads_dir: PathBuf,
    config: UploadConfig,
}

impl UploadService {
    pub fn new(
        db: Arc<Database>,
        embedder: Option<Arc<dyn Embedder>>,
        uploads_dir: PathBuf,
        config: UploadConfig,
    ) -> Self {
        if embedder.is_none() {
            tracing::warn!("No embeddings endpoint configured; uploads are stored without vectors");
        }
        Self {
            db,
            embedder,
            uploads_dir,
            config,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.config.max_bytes
    }

    /// Ingest one file for a chat, creating the chat if needed.
    pub async fn ingest(&self, user: &Profile, file: IncomingFile) -> Result<UploadReceipt> {
        let size = file.bytes.len() as u64;
        let kind = validate_upload(&file.content_type, size, self.config.max_bytes)?;
        if file.chat_id.trim().is_empty() {
            return Err(Error::Validation("chatId is required".to_string()));
        }

        self.ensure_chat(user, &file.chat_id).await?;

        let file_id = generate_id();
        let relative = format!("{}/{file_id}.{}", user.id, kind.extension());
        let stored_path = self.uploads_dir.join(&relative);
        write_file(&stored_path, &file.bytes).await?;

        match self.index(user, &file, kind, &file_id, &relative, size).await {
            Ok(chunks) => {
                tracing::info!(
                    file_id = %file_id,
                    chunks,
                    size,
                    kind = kind.content_type(),
                    "Stored upload"
                );
                Ok(UploadReceipt {
                    url: format!("file://{}", stored_path.display()),
                    path: relative,
                })
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&stored_path).await {
                    tracing::warn!("Failed to remove {}: {remove_err}", stored_path.display());
                }
                Err(e)
            }
        }
    }

    async fn ensure_chat(&self, user: &Profile, chat_id: &str) -> Result<()> {
        match self.db.get_chat(chat_id).await? {
            Some(chat) if chat.user_id == user.id => Ok(()),
            Some(_) => Err(Error::Unauthorized("chat belongs to another user".to_string())),
            None => {
                self.db
                    .create_chat(&Chat {
                        id: chat_id.to_string(),
                        user_id: user.id.clone(),
                        title: DEFAULT_CHAT_TITLE.to_string(),
                        created_at: Utc::now(),
                    })
                    .await?;
                Ok(())
            }
        }
    }

    /// Extract, chunk, embed and store. Returns the chunk count.
    async fn index(
        &self,
        user: &Profile,
        file: &IncomingFile,
        kind: FileKind,
        file_id: &str,
        relative: &str,
        size: u64,
    ) -> Result<usize> {
        let bytes = file.bytes.clone();
        let text = tokio::task::spawn_blocking(move || extract_text(kind, &bytes))
            .await
            .map_err(|e| Error::Extraction(format!("extraction task failed: {e}")))??;

        let pieces = chunk_text(&text, self.config.chunk_size, self.config.chunk_overlap);
        let embeddings: Vec<Option<Vec<f32>>> = match &self.embedder {
            Some(embedder) if !pieces.is_empty() => {
                let inputs: Vec<String> = pieces.iter().map(|p| p.content.clone()).collect();
                embedder.embed(&inputs).await?.into_iter().map(Some).collect()
            }
            _ => vec![None; pieces.len()],
        };

        let chunks: Vec<FileChunk> = pieces
            .into_iter()
            .zip(embeddings)
            .map(|(piece, embedding)| FileChunk {
                id: generate_id(),
                file_id: file_id.to_string(),
                idx: i64::try_from(piece.idx).unwrap_or(i64::MAX),
                content: piece.content,
                metadata: json!({
                    "source": file.name,
                    "start": piece.start,
                    "end": piece.end,
                }),
                embedding,
            })
            .collect();

        let attachment = FileAttachment {
            id: file_id.to_string(),
            chat_id: file.chat_id.clone(),
            user_id: user.id.clone(),
            name: file.name.clone(),
            path: relative.to_string(),
            content_type: kind.content_type().to_string(),
            size: i64::try_from(size).unwrap_or(i64::MAX),
            created_at: Utc::now(),
        };
        self.db.insert_file(&attachment, &chunks).await?;
        Ok(chunks.len())
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
