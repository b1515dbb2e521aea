//! Record store on SQLite. Documents, sessions, messages and artifacts live in one
//! database; timestamps are stored as UTC nanoseconds so ordering happens in SQL.

use crate::models::{
    ArtifactKind, Document, FieldValues, Fingerprint, GeneratedArtifact, IndexHandle, Message,
    NewMessage, Role, Session,
};
use crate::store::{ArtifactStore, ConversationStore, DocumentStore};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

/// Added to the newest message of a session when a new message would not sort after it.
const MESSAGE_STEP_NANOS: i64 = 1_000;

const DOCUMENT_COLUMNS: &str = "document_id, user_id, original_name, fingerprint, blob_handle, \
processed, index_handle, uploaded_at, is_deleted, deleted_at";

const SESSION_COLUMNS: &str =
    "session_id, document_id, user_id, title, created_at, updated_at, is_deleted";

const ARTIFACT_COLUMNS: &str = "artifact_id, user_id, kind, type_key, title, inputs_json, \
custom_prompt, html_body, text_body, created_at, updated_at, is_deleted";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file and applies the schema.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        debug!(path = %path.display(), "record store opened");
        Ok(store)
    }

    /// Private in-memory database. One connection that never expires, because every
    /// SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                document_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                original_name TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                blob_handle TEXT,
                processed INTEGER NOT NULL DEFAULT 0,
                index_handle TEXT,
                uploaded_at INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // The dedup key only binds live documents; a soft-deleted upload frees it.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_live_fingerprint
            ON documents(user_id, fingerprint) WHERE is_deleted = 0
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                message_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                UNIQUE(session_id, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                artifact_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                type_key TEXT NOT NULL,
                title TEXT NOT NULL,
                inputs_json TEXT NOT NULL DEFAULT '[]',
                custom_prompt TEXT,
                html_body TEXT NOT NULL,
                text_body TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id, uploaded_at DESC)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_document ON sessions(document_id, updated_at DESC)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_artifacts_user ON artifacts(user_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn nanos(at: DateTime<Utc>) -> Result<i64, StoreError> {
    at.timestamp_nanos_opt()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {at}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|error| StoreError::Corrupt(format!("bad uuid {raw}: {error}")))
}

fn parse_role(raw: &str) -> Result<Role, StoreError> {
    match raw {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        other => Err(StoreError::Corrupt(format!("unknown role {other}"))),
    }
}

/// Unique index violations become `Conflict`; everything else stays a database error.
fn conflict_or_database(error: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    match &error {
        sqlx::Error::Database(database) if database.is_unique_violation() => {
            StoreError::Conflict(what())
        }
        _ => StoreError::Database(error),
    }
}

fn expect_one(rows_affected: u64, what: impl FnOnce() -> String) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound(what()));
    }
    Ok(())
}

fn document_from_row(row: &SqliteRow) -> Result<Document, StoreError> {
    let document_id: String = row.try_get("document_id")?;
    let deleted_at: Option<i64> = row.try_get("deleted_at")?;
    Ok(Document {
        document_id: parse_uuid(&document_id)?,
        user_id: row.try_get("user_id")?,
        original_name: row.try_get("original_name")?,
        fingerprint: Fingerprint::from_hex(row.try_get::<String, _>("fingerprint")?),
        blob_handle: row.try_get("blob_handle")?,
        processed: row.try_get("processed")?,
        index_handle: row
            .try_get::<Option<String>, _>("index_handle")?
            .map(IndexHandle::from_raw),
        uploaded_at: DateTime::from_timestamp_nanos(row.try_get("uploaded_at")?),
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: deleted_at.map(DateTime::from_timestamp_nanos),
    })
}

fn session_from_row(row: &SqliteRow) -> Result<Session, StoreError> {
    let session_id: String = row.try_get("session_id")?;
    let document_id: String = row.try_get("document_id")?;
    Ok(Session {
        session_id: parse_uuid(&session_id)?,
        document_id: parse_uuid(&document_id)?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        created_at: DateTime::from_timestamp_nanos(row.try_get("created_at")?),
        updated_at: DateTime::from_timestamp_nanos(row.try_get("updated_at")?),
        is_deleted: row.try_get("is_deleted")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, StoreError> {
    let message_id: String = row.try_get("message_id")?;
    let session_id: String = row.try_get("session_id")?;
    let role: String = row.try_get("role")?;
    Ok(Message {
        message_id: parse_uuid(&message_id)?,
        session_id: parse_uuid(&session_id)?,
        role: parse_role(&role)?,
        content: row.try_get("content")?,
        timestamp: DateTime::from_timestamp_nanos(row.try_get("timestamp")?),
        is_deleted: row.try_get("is_deleted")?,
    })
}

fn artifact_from_row(row: &SqliteRow) -> Result<GeneratedArtifact, StoreError> {
    let artifact_id: String = row.try_get("artifact_id")?;
    let kind: String = row.try_get("kind")?;
    let inputs_json: String = row.try_get("inputs_json")?;
    Ok(GeneratedArtifact {
        artifact_id: parse_uuid(&artifact_id)?,
        user_id: row.try_get("user_id")?,
        kind: kind.parse::<ArtifactKind>().map_err(StoreError::Corrupt)?,
        type_key: row.try_get("type_key")?,
        title: row.try_get("title")?,
        inputs: serde_json::from_str::<FieldValues>(&inputs_json)?,
        custom_prompt: row.try_get("custom_prompt")?,
        html_body: row.try_get("html_body")?,
        text_body: row.try_get("text_body")?,
        created_at: DateTime::from_timestamp_nanos(row.try_get("created_at")?),
        updated_at: DateTime::from_timestamp_nanos(row.try_get("updated_at")?),
        is_deleted: row.try_get("is_deleted")?,
    })
}

/// Inserts one message inside `tx`. The insert computes the stored timestamp itself, so
/// it is strictly later than every message already in the session.
async fn insert_message(
    tx: &mut sqlx::SqliteConnection,
    message: NewMessage,
) -> Result<Message, StoreError> {
    let message_id = Uuid::new_v4();
    let session_id = message.session_id.to_string();
    let requested = nanos(message.timestamp)?;

    let timestamp: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO messages (message_id, session_id, role, content, timestamp, is_deleted)
        VALUES (?, ?, ?, ?, MAX(?, COALESCE(
            (SELECT MAX(timestamp) FROM messages WHERE session_id = ?) + ?, 0)), 0)
        RETURNING timestamp
        "#,
    )
    .bind(message_id.to_string())
    .bind(&session_id)
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(requested)
    .bind(&session_id)
    .bind(MESSAGE_STEP_NANOS)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE sessions SET updated_at = MAX(updated_at, ?) WHERE session_id = ?")
        .bind(timestamp)
        .bind(&session_id)
        .execute(&mut *tx)
        .await?;

    Ok(Message {
        message_id,
        session_id: message.session_id,
        role: message.role,
        content: message.content,
        timestamp: DateTime::from_timestamp_nanos(timestamp),
        is_deleted: false,
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create_document(&self, document: &Document) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO documents ({DOCUMENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(document.document_id.to_string())
        .bind(&document.user_id)
        .bind(&document.original_name)
        .bind(document.fingerprint.as_str())
        .bind(&document.blob_handle)
        .bind(document.processed)
        .bind(document.index_handle.as_ref().map(IndexHandle::as_str))
        .bind(nanos(document.uploaded_at)?)
        .bind(document.is_deleted)
        .bind(document.deleted_at.map(nanos).transpose()?)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            conflict_or_database(error, || {
                format!(
                    "user {} already has fingerprint {}",
                    document.user_id, document.fingerprint
                )
            })
        })?;
        Ok(())
    }

    async fn get_document(&self, document_id: Uuid) -> Result<Option<Document>, StoreError> {
        sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE document_id = ?"
        ))
        .bind(document_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(document_from_row)
        .transpose()
    }

    async fn find_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Document>, StoreError> {
        sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents \
             WHERE user_id = ? AND fingerprint = ? AND is_deleted = 0"
        ))
        .bind(user_id)
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(document_from_row)
        .transpose()
    }

    async fn list_documents(&self, user_id: &str) -> Result<Vec<Document>, StoreError> {
        sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents \
             WHERE user_id = ? AND is_deleted = 0 ORDER BY uploaded_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(document_from_row)
        .collect()
    }

    async fn set_blob_handle(&self, document_id: Uuid, blob_handle: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE documents SET blob_handle = ? WHERE document_id = ?")
            .bind(blob_handle)
            .bind(document_id.to_string())
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected(), || format!("document {document_id}"))
    }

    async fn mark_processed(
        &self,
        document_id: Uuid,
        index_handle: &IndexHandle,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE documents SET processed = 1, index_handle = ? WHERE document_id = ?",
        )
        .bind(index_handle.as_str())
        .bind(document_id.to_string())
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), || format!("document {document_id}"))
    }

    async fn soft_delete(&self, document_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE documents SET is_deleted = 1, deleted_at = ? WHERE document_id = ?",
        )
        .bind(nanos(Utc::now())?)
        .bind(document_id.to_string())
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), || format!("document {document_id}"))
    }

    async fn hard_delete(&self, document_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM documents WHERE document_id = ?")
            .bind(document_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?"
        ))
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(session_from_row)
        .transpose()
    }

    async fn upsert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, document_id, user_id, title, created_at, updated_at, is_deleted)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                title = excluded.title,
                updated_at = excluded.updated_at,
                is_deleted = excluded.is_deleted
            "#,
        )
        .bind(session.session_id.to_string())
        .bind(session.document_id.to_string())
        .bind(&session.user_id)
        .bind(&session.title)
        .bind(nanos(session.created_at)?)
        .bind(nanos(session.updated_at)?)
        .bind(session.is_deleted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn open_session(
        &self,
        session: &Session,
        first_message: NewMessage,
    ) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await?;

        // The session row is written second so it can carry the message timestamp.
        let message = insert_message(&mut tx, first_message).await?;

        sqlx::query(&format!(
            "INSERT INTO sessions ({SESSION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(session.session_id.to_string())
        .bind(session.document_id.to_string())
        .bind(&session.user_id)
        .bind(&session.title)
        .bind(nanos(session.created_at)?)
        .bind(nanos(session.updated_at.max(message.timestamp))?)
        .bind(session.is_deleted)
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            conflict_or_database(error, || format!("session {} already exists", session.session_id))
        })?;

        tx.commit().await?;
        Ok(message)
    }

    async fn list_sessions(
        &self,
        user_id: &str,
        document_id: Uuid,
    ) -> Result<Vec<Session>, StoreError> {
        sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = ? AND document_id = ? AND is_deleted = 0 ORDER BY updated_at DESC"
        ))
        .bind(user_id)
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(session_from_row)
        .collect()
    }

    async fn soft_delete_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE sessions SET is_deleted = 1 WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected(), || format!("session {session_id}"))
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await?;
        let stored = insert_message(&mut tx, message).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>, StoreError> {
        sqlx::query(
            "SELECT message_id, session_id, role, content, timestamp, is_deleted FROM messages \
             WHERE session_id = ? AND is_deleted = 0 ORDER BY timestamp ASC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(message_from_row)
        .collect()
    }
}

#[async_trait]
impl ArtifactStore for SqliteStore {
    async fn create_artifact(&self, artifact: &GeneratedArtifact) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO artifacts ({ARTIFACT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(artifact.artifact_id.to_string())
        .bind(&artifact.user_id)
        .bind(artifact.kind.as_str())
        .bind(&artifact.type_key)
        .bind(&artifact.title)
        .bind(serde_json::to_string(&artifact.inputs)?)
        .bind(&artifact.custom_prompt)
        .bind(&artifact.html_body)
        .bind(&artifact.text_body)
        .bind(nanos(artifact.created_at)?)
        .bind(nanos(artifact.updated_at)?)
        .bind(artifact.is_deleted)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            conflict_or_database(error, || format!("artifact {} already exists", artifact.artifact_id))
        })?;
        Ok(())
    }

    async fn get_artifact(&self, artifact_id: Uuid) -> Result<Option<GeneratedArtifact>, StoreError> {
        sqlx::query(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE artifact_id = ?"
        ))
        .bind(artifact_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(artifact_from_row)
        .transpose()
    }

    async fn list_artifacts(
        &self,
        user_id: &str,
        kind: Option<ArtifactKind>,
    ) -> Result<Vec<GeneratedArtifact>, StoreError> {
        sqlx::query(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts \
             WHERE user_id = ? AND is_deleted = 0 AND (? IS NULL OR kind = ?) \
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .bind(kind.map(|kind| kind.as_str()))
        .bind(kind.map(|kind| kind.as_str()))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(artifact_from_row)
        .collect()
    }

    async fn update_artifact(&self, artifact: &GeneratedArtifact) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE artifacts SET title = ?, inputs_json = ?, custom_prompt = ?, html_body = ?,
                text_body = ?, updated_at = ?, is_deleted = ?
            WHERE artifact_id = ?
            "#,
        )
        .bind(&artifact.title)
        .bind(serde_json::to_string(&artifact.inputs)?)
        .bind(&artifact.custom_prompt)
        .bind(&artifact.html_body)
        .bind(&artifact.text_body)
        .bind(nanos(artifact.updated_at)?)
        .bind(artifact.is_deleted)
        .bind(artifact.artifact_id.to_string())
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), || format!("artifact {}", artifact.artifact_id))
    }

    async fn soft_delete_artifact(&self, artifact_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE artifacts SET is_deleted = 1, updated_at = ? WHERE artifact_id = ?",
        )
        .bind(nanos(Utc::now())?)
        .bind(artifact_id.to_string())
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), || format!("artifact {artifact_id}"))
    }
}
