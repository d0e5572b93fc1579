//! SQLite metadata store.

use super::{AccountDirectory, MetadataStore};
use crate::error::{Result, StudyError};
use crate::models::{
    AccountTier, Chunk, Classroom, Document, DocumentStatus, GeneratedArtifact, GenerationMode,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS accounts (
        account_id TEXT PRIMARY KEY,
        tier TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS classrooms (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_classrooms_account ON classrooms(account_id);

    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        classroom_id TEXT NOT NULL REFERENCES classrooms(id) ON DELETE CASCADE,
        filename TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        byte_size INTEGER NOT NULL,
        storage_key TEXT NOT NULL,
        status TEXT NOT NULL,
        extractor TEXT,
        failure_reason TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_documents_classroom ON documents(classroom_id);

    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        ordinal INTEGER NOT NULL,
        content TEXT NOT NULL,
        vector_id TEXT NOT NULL,
        page INTEGER,
        start_offset INTEGER NOT NULL,
        end_offset INTEGER NOT NULL,
        UNIQUE (document_id, ordinal)
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_vector ON chunks(vector_id);

    CREATE TABLE IF NOT EXISTS artifacts (
        id TEXT PRIMARY KEY,
        classroom_id TEXT NOT NULL REFERENCES classrooms(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        title TEXT NOT NULL,
        focus_topic TEXT,
        mode TEXT NOT NULL,
        sources_json TEXT NOT NULL,
        payload_json TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_artifacts_classroom ON artifacts(classroom_id);

    CREATE TABLE IF NOT EXISTS usage (
        account_id TEXT NOT NULL,
        day TEXT NOT NULL,
        weighted_tokens INTEGER NOT NULL,
        PRIMARY KEY (account_id, day)
    );
"#;

const DOCUMENT_COLUMNS: &str = "id, classroom_id, filename, mime_type, byte_size, storage_key, \
     status, extractor, failure_reason, created_at, updated_at";

const CHUNK_COLUMNS: &str =
    "id, document_id, ordinal, content, vector_id, page, start_offset, end_offset";

const ARTIFACT_COLUMNS: &str =
    "id, classroom_id, title, focus_topic, mode, sources_json, payload_json, created_at";

/// SQLite-backed [`MetadataStore`] and [`AccountDirectory`].
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the store at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn, Some(path))
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        if let Some(path) = path {
            info!("Initialized metadata store at {:?}", path);
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StudyError::Storage(format!("Failed to acquire lock: {}", e)))
    }
}

fn conversion_error(idx: usize, e: Box<dyn std::error::Error + Send + Sync>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e)
}

fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, Box::new(e)))
}

fn get_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, Box::new(e)))
}

fn get_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| conversion_error(idx, e.into()))
}

fn get_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, Box::new(e)))
}

fn classroom_from_row(row: &Row<'_>) -> rusqlite::Result<Classroom> {
    Ok(Classroom {
        id: get_uuid(row, 0)?,
        account_id: row.get(1)?,
        name: row.get(2)?,
        created_at: get_time(row, 3)?,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: get_uuid(row, 0)?,
        classroom_id: get_uuid(row, 1)?,
        filename: row.get(2)?,
        mime_type: row.get(3)?,
        byte_size: row.get::<_, i64>(4)? as u64,
        storage_key: row.get(5)?,
        status: get_parsed::<DocumentStatus>(row, 6)?,
        extractor: row.get(7)?,
        failure_reason: row.get(8)?,
        created_at: get_time(row, 9)?,
        updated_at: get_time(row, 10)?,
    })
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: get_uuid(row, 0)?,
        document_id: get_uuid(row, 1)?,
        ordinal: row.get(2)?,
        content: row.get(3)?,
        vector_id: row.get(4)?,
        page: row.get(5)?,
        start_offset: row.get::<_, i64>(6)? as usize,
        end_offset: row.get::<_, i64>(7)? as usize,
    })
}

fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<GeneratedArtifact> {
    Ok(GeneratedArtifact {
        id: get_uuid(row, 0)?,
        classroom_id: get_uuid(row, 1)?,
        title: row.get(2)?,
        focus_topic: row.get(3)?,
        mode: get_parsed::<GenerationMode>(row, 4)?,
        sources: get_json(row, 5)?,
        payload: get_json(row, 6)?,
        created_at: get_time(row, 7)?,
    })
}

fn insert_chunks(tx: &Transaction<'_>, chunks: &[Chunk]) -> Result<()> {
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO chunks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        CHUNK_COLUMNS
    ))?;
    for chunk in chunks {
        stmt.execute(params![
            chunk.id.to_string(),
            chunk.document_id.to_string(),
            chunk.ordinal,
            chunk.content,
            chunk.vector_id,
            chunk.page,
            chunk.start_offset as i64,
            chunk.end_offset as i64,
        ])?;
    }
    Ok(())
}

fn select_chunks(conn: &Connection, document_id: Uuid) -> Result<Vec<Chunk>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM chunks WHERE document_id = ?1 ORDER BY ordinal",
        CHUNK_COLUMNS
    ))?;
    let chunks = stmt
        .query_map(params![document_id.to_string()], chunk_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(chunks)
}

fn select_document(conn: &Connection, id: Uuid) -> Result<Option<Document>> {
    let document = conn
        .query_row(
            &format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS),
            params![id.to_string()],
            document_from_row,
        )
        .optional()?;
    Ok(document)
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create_classroom(&self, classroom: &Classroom) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO classrooms (id, account_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                classroom.id.to_string(),
                classroom.account_id,
                classroom.name,
                classroom.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_classroom(&self, id: Uuid) -> Result<Option<Classroom>> {
        let conn = self.lock()?;
        let classroom = conn
            .query_row(
                "SELECT id, account_id, name, created_at FROM classrooms WHERE id = ?1",
                params![id.to_string()],
                classroom_from_row,
            )
            .optional()?;
        Ok(classroom)
    }

    async fn list_classrooms(&self, account_id: &str) -> Result<Vec<Classroom>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, account_id, name, created_at FROM classrooms \
             WHERE account_id = ?1 ORDER BY created_at",
        )?;
        let classrooms = stmt
            .query_map(params![account_id], classroom_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(classrooms)
    }

    async fn count_classrooms(&self, account_id: &str) -> Result<u32> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM classrooms WHERE account_id = ?1",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO documents ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                DOCUMENT_COLUMNS
            ),
            params![
                document.id.to_string(),
                document.classroom_id.to_string(),
                document.filename,
                document.mime_type,
                document.byte_size as i64,
                document.storage_key,
                document.status.as_str(),
                document.extractor,
                document.failure_reason,
                document.created_at.to_rfc3339(),
                document.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let conn = self.lock()?;
        select_document(&conn, id)
    }

    async fn list_documents(&self, classroom_id: Uuid) -> Result<Vec<Document>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE classroom_id = ?1 ORDER BY created_at, id",
            DOCUMENT_COLUMNS
        ))?;
        let documents = stmt
            .query_map(params![classroom_id.to_string()], document_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(documents)
    }

    #[instrument(skip(self, reason))]
    async fn transition_status(
        &self,
        id: Uuid,
        from: DocumentStatus,
        to: DocumentStatus,
        reason: Option<&str>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) || to == DocumentStatus::Ready {
            return Err(StudyError::Conflict(format!(
                "Illegal status transition {} -> {}",
                from, to
            )));
        }

        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE documents SET status = ?1, failure_reason = ?2, updated_at = ?3 \
             WHERE id = ?4 AND status = ?5",
            params![
                to.as_str(),
                reason,
                Utc::now().to_rfc3339(),
                id.to_string(),
                from.as_str(),
            ],
        )?;
        debug!("Transition {} -> {} for {}: {}", from, to, id, updated == 1);
        Ok(updated == 1)
    }

    #[instrument(skip(self, chunks), fields(chunks = chunks.len()))]
    async fn mark_ready(&self, id: Uuid, chunks: &[Chunk], extractor: &str) -> Result<bool> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let updated = tx.execute(
            "UPDATE documents SET status = ?1, extractor = ?2, failure_reason = NULL, updated_at = ?3 \
             WHERE id = ?4 AND status = ?5",
            params![
                DocumentStatus::Ready.as_str(),
                extractor,
                Utc::now().to_rfc3339(),
                id.to_string(),
                DocumentStatus::Processing.as_str(),
            ],
        )?;
        if updated == 0 {
            return Ok(false);
        }

        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![id.to_string()])?;
        insert_chunks(&tx, chunks)?;
        tx.commit()?;
        Ok(true)
    }

    #[instrument(skip(self, chunks), fields(chunks = chunks.len()))]
    async fn replace_chunks(&self, id: Uuid, chunks: &[Chunk], extractor: &str) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let document = select_document(&tx, id)?
            .ok_or_else(|| StudyError::NotFound(format!("document {}", id)))?;
        if document.status != DocumentStatus::Ready {
            return Err(StudyError::Conflict(format!(
                "document {} is {}, not READY",
                id, document.status
            )));
        }

        let previous = select_chunks(&tx, id)?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![id.to_string()])?;
        insert_chunks(&tx, chunks)?;
        tx.execute(
            "UPDATE documents SET extractor = ?1, updated_at = ?2 WHERE id = ?3",
            params![extractor, Utc::now().to_rfc3339(), id.to_string()],
        )?;
        tx.commit()?;
        Ok(previous)
    }

    async fn list_chunks(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        select_chunks(&conn, document_id)
    }

    async fn get_chunks(&self, vector_ids: &[String]) -> Result<Vec<Chunk>> {
        if vector_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; vector_ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE vector_id IN ({})",
            CHUNK_COLUMNS, placeholders
        ))?;
        let chunks = stmt
            .query_map(params_from_iter(vector_ids.iter()), chunk_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    #[instrument(skip(self))]
    async fn delete_document(&self, id: Uuid) -> Result<Option<(Document, Vec<Chunk>)>> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let Some(document) = select_document(&tx, id)? else {
            return Ok(None);
        };
        if document.status == DocumentStatus::Processing {
            return Err(StudyError::Conflict(format!(
                "document {} is being processed",
                id
            )));
        }

        let chunks = select_chunks(&tx, id)?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![id.to_string()])?;
        tx.execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;

        info!("Deleted document {} with {} chunks", id, chunks.len());
        Ok(Some((document, chunks)))
    }

    async fn storage_used(&self, account_id: &str) -> Result<u64> {
        let conn = self.lock()?;
        let used: i64 = conn.query_row(
            "SELECT COALESCE(SUM(d.byte_size), 0) FROM documents d \
             JOIN classrooms c ON c.id = d.classroom_id WHERE c.account_id = ?1",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(used as u64)
    }

    async fn insert_artifact(&self, artifact: &GeneratedArtifact) -> Result<()> {
        let sources = serde_json::to_string(&artifact.sources)?;
        let payload = serde_json::to_string(&artifact.payload)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO artifacts (id, classroom_id, kind, title, focus_topic, mode, \
             sources_json, payload_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                artifact.id.to_string(),
                artifact.classroom_id.to_string(),
                artifact.kind().as_str(),
                artifact.title,
                artifact.focus_topic,
                artifact.mode.as_str(),
                sources,
                payload,
                artifact.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_artifact(&self, id: Uuid) -> Result<Option<GeneratedArtifact>> {
        let conn = self.lock()?;
        let artifact = conn
            .query_row(
                &format!("SELECT {} FROM artifacts WHERE id = ?1", ARTIFACT_COLUMNS),
                params![id.to_string()],
                artifact_from_row,
            )
            .optional()?;
        Ok(artifact)
    }

    async fn list_artifacts(&self, classroom_id: Uuid) -> Result<Vec<GeneratedArtifact>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM artifacts WHERE classroom_id = ?1 ORDER BY created_at DESC, id",
            ARTIFACT_COLUMNS
        ))?;
        let artifacts = stmt
            .query_map(params![classroom_id.to_string()], artifact_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(artifacts)
    }

    async fn delete_artifact(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM artifacts WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted == 1)
    }

    async fn usage_for_day(&self, account_id: &str, day: NaiveDate) -> Result<u64> {
        let conn = self.lock()?;
        let used: Option<i64> = conn
            .query_row(
                "SELECT weighted_tokens FROM usage WHERE account_id = ?1 AND day = ?2",
                params![account_id, day.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(used.unwrap_or(0) as u64)
    }

    async fn add_usage(&self, account_id: &str, day: NaiveDate, weighted_tokens: u64) -> Result<u64> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row(
            "INSERT INTO usage (account_id, day, weighted_tokens) VALUES (?1, ?2, ?3) \
             ON CONFLICT(account_id, day) DO UPDATE \
             SET weighted_tokens = weighted_tokens + excluded.weighted_tokens \
             RETURNING weighted_tokens",
            params![account_id, day.to_string(), weighted_tokens as i64],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }
}

#[async_trait]
impl AccountDirectory for SqliteMetadataStore {
    async fn get_tier(&self, account_id: &str) -> Result<AccountTier> {
        let conn = self.lock()?;
        let tier: Option<String> = conn
            .query_row(
                "SELECT tier FROM accounts WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .optional()?;
        match tier {
            Some(raw) => raw.parse().map_err(StudyError::Storage),
            None => Ok(AccountTier::Free),
        }
    }

    async fn set_tier(&self, account_id: &str, tier: AccountTier) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO accounts (account_id, tier) VALUES (?1, ?2) \
             ON CONFLICT(account_id) DO UPDATE SET tier = excluded.tier",
            params![account_id, tier.as_str()],
        )?;
        Ok(())
    }
}
