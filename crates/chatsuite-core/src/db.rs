//! Database operations for ChatSuite.

use crate::error::{Error, Result};
use crate::models::*;
use crate::parts::{format_for_storage, parse_stored};
use crate::schema::SCHEMA;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Database handle for ChatSuite.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        let parent = path.parent().unwrap_or(Path::new("."));
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize schema.
    async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Close the database.
    pub async fn close(self) {
        self.pool.close().await;
    }

    // =========================================================================
    // Profiles and credits
    // =========================================================================

    /// Create a profile and return it with its bearer token.
    pub async fn create_profile(
        &self,
        email: Option<&str>,
        credits: i64,
    ) -> Result<(Profile, String)> {
        if credits < 0 {
            return Err(Error::Validation("credits cannot be negative".to_string()));
        }
        let profile = Profile {
            id: generate_id(),
            email: email.map(ToOwned::to_owned),
            credits,
            created_at: Utc::now(),
        };
        let token = format!("cs_{}", uuid::Uuid::new_v4().simple());

        sqlx::query(
            "INSERT INTO profiles (id, token, email, credits, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&profile.id)
        .bind(&token)
        .bind(&profile.email)
        .bind(profile.credits)
        .bind(profile.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok((profile, token))
    }

    /// Resolve a bearer token to its profile.
    pub async fn profile_by_token(&self, token: &str) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(profile_from_row))
    }

    /// List all profiles, oldest first.
    pub async fn list_profiles(&self) -> Result<Vec<Profile>> {
        let rows = sqlx::query("SELECT * FROM profiles ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(profile_from_row).collect())
    }

    /// Current credit balance.
    pub async fn credits_for(&self, user_id: &str) -> Result<i64> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT credits FROM profiles WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(credits,)| credits)
            .ok_or_else(|| Error::NotFound(format!("profile '{user_id}'")))
    }

    /// Atomically charge `cost` credits if the balance covers it.
    ///
    /// Returns the remaining balance, or `None` when the balance is too low
    /// (nothing is changed in that case).
    pub async fn try_consume_credits(&self, user_id: &str, cost: i64) -> Result<Option<i64>> {
        if cost < 0 {
            return Err(Error::Validation("cost cannot be negative".to_string()));
        }
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE profiles SET credits = credits - ? WHERE id = ? AND credits >= ? RETURNING credits",
        )
        .bind(cost)
        .bind(user_id)
        .bind(cost)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(credits,)| credits))
    }

    /// Add credits (grant or refund) and return the new balance.
    pub async fn add_credits(&self, user_id: &str, amount: i64) -> Result<i64> {
        if amount < 0 {
            return Err(Error::Validation("amount cannot be negative".to_string()));
        }
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE profiles SET credits = credits + ? WHERE id = ? RETURNING credits",
        )
        .bind(amount)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(credits,)| credits)
            .ok_or_else(|| Error::NotFound(format!("profile '{user_id}'")))
    }

    // =========================================================================
    // Chats
    // =========================================================================

    /// Insert a chat unless one with the same ID already exists.
    ///
    /// Returns `true` when this call created the row.
    pub async fn create_chat(&self, chat: &Chat) -> Result<bool> {
        let title = if chat.title.trim().is_empty() {
            DEFAULT_CHAT_TITLE
        } else {
            chat.title.as_str()
        };
        let result = sqlx::query(
            "INSERT INTO chats (id, user_id, title, created_at) VALUES (?, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(&chat.id)
        .bind(&chat.user_id)
        .bind(title)
        .bind(chat.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Get a chat by ID.
    pub async fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
        let row = sqlx::query("SELECT * FROM chats WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(chat_from_row))
    }

    /// List a user's chats, newest first.
    pub async fn list_chats(&self, user_id: &str, limit: Option<i64>) -> Result<Vec<Chat>> {
        let rows = sqlx::query(
            "SELECT * FROM chats WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chat_from_row).collect())
    }

    /// Replace the title only while it is still the default.
    ///
    /// Returns `true` when the title changed. Calling this again after a
    /// successful rename is a no-op.
    pub async fn rename_default_title(&self, id: &str, title: &str) -> Result<bool> {
        let title = title.trim();
        if title.is_empty() || title == DEFAULT_CHAT_TITLE {
            return Ok(false);
        }
        let result = sqlx::query("UPDATE chats SET title = ? WHERE id = ? AND title = ?")
            .bind(title)
            .bind(id)
            .bind(DEFAULT_CHAT_TITLE)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a chat with its messages and uploads.
    pub async fn delete_chat(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM file_chunks WHERE file_id IN (SELECT id FROM files WHERE chat_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM files WHERE chat_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::NotFound(format!("chat '{id}'")));
        }

        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Append a message. Re-inserting an existing ID is a no-op.
    pub async fn insert_message(&self, msg: &Message) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_message_with(&mut conn, msg).await
    }

    /// Chat a message ID is stored under, if any.
    pub async fn message_chat_id(&self, id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT chat_id FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(chat_id,)| chat_id))
    }

    /// Append several messages atomically, in order.
    pub async fn insert_messages(&self, msgs: &[Message]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for msg in msgs {
            insert_message_with(&mut tx, msg).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Get messages for a chat in append order.
    pub async fn get_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query("SELECT * FROM messages WHERE chat_id = ? ORDER BY seq")
            .bind(chat_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    /// Get message count for a chat.
    pub async fn count_messages(&self, chat_id: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Insert a document.
    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            "INSERT INTO documents (id, user_id, title, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&doc.id)
        .bind(&doc.user_id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(doc.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a document by ID.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    /// Overwrite a document's content.
    pub async fn update_document_content(&self, id: &str, content: &str) -> Result<()> {
        let result = sqlx::query("UPDATE documents SET content = ? WHERE id = ?")
            .bind(content)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("document '{id}'")));
        }
        Ok(())
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Store an upload record with its extracted chunks.
    pub async fn insert_file(&self, file: &FileAttachment, chunks: &[FileChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO files (id, chat_id, user_id, name, path, content_type, size, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.chat_id)
        .bind(&file.user_id)
        .bind(&file.name)
        .bind(&file.path)
        .bind(&file.content_type)
        .bind(file.size)
        .bind(file.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            let embedding = chunk
                .embedding
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(
                "INSERT INTO file_chunks (id, file_id, idx, content, metadata, embedding) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&file.id)
            .bind(chunk.idx)
            .bind(&chunk.content)
            .bind(chunk.metadata.to_string())
            .bind(embedding)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// The user's most recent upload with its chunks.
    pub async fn latest_file_for_user(&self, user_id: &str) -> Result<Option<FileWithChunks>> {
        let row = sqlx::query(
            "SELECT * FROM files WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let file = file_from_row(&row);
        let chunks = self.get_file_chunks(&file.id).await?;
        Ok(Some(FileWithChunks { file, chunks }))
    }

    /// Chunks of an upload in order.
    pub async fn get_file_chunks(&self, file_id: &str) -> Result<Vec<FileChunk>> {
        let rows = sqlx::query("SELECT * FROM file_chunks WHERE file_id = ? ORDER BY idx")
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }
}

async fn insert_message_with(conn: &mut sqlx::SqliteConnection, msg: &Message) -> Result<()> {
    let stored = format_for_storage(&ChatMessage {
        role: msg.role,
        content: msg.content.clone(),
    });
    sqlx::query(
        r#"
        INSERT INTO messages (id, chat_id, role, content, parts_json, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(&msg.id)
    .bind(&msg.chat_id)
    .bind(msg.role.to_string())
    .bind(stored.content)
    .bind(stored.parts_json.to_string())
    .bind(msg.created_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn timestamp(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn profile_from_row(row: &SqliteRow) -> Profile {
    Profile {
        id: row.get("id"),
        email: row.get("email"),
        credits: row.get("credits"),
        created_at: timestamp(row.get("created_at")),
    }
}

fn chat_from_row(row: &SqliteRow) -> Chat {
    Chat {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        created_at: timestamp(row.get("created_at")),
    }
}

fn message_from_row(row: &SqliteRow) -> Message {
    let content: String = row.get("content");
    let parts_json = row
        .get::<Option<String>, _>("parts_json")
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(|| serde_json::json!([]));
    Message {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        role: MessageRole::from(row.get::<&str, _>("role")),
        content: parse_stored(&content, &parts_json),
        created_at: timestamp(row.get("created_at")),
    }
}

fn document_from_row(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        content: row.get("content"),
        created_at: timestamp(row.get("created_at")),
    }
}

fn file_from_row(row: &SqliteRow) -> FileAttachment {
    FileAttachment {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        path: row.get("path"),
        content_type: row.get("content_type"),
        size: row.get("size"),
        created_at: timestamp(row.get("created_at")),
    }
}

fn chunk_from_row(row: &SqliteRow) -> FileChunk {
    FileChunk {
        id: row.get("id"),
        file_id: row.get("file_id"),
        idx: row.get("idx"),
        content: row.get("content"),
        metadata: row
            .get::<Option<String>, _>("metadata")
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        embedding: row
            .get::<Option<String>, _>("embedding")
            .and_then(|s| serde_json::from_str(&s).ok()),
    }
}
