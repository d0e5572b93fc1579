//! SQLite-based vector index implementation.
//!
//! Uses SQLite with cosine similarity computed in Rust for simplicity.
//! Each query scans one namespace, so cost grows with the classroom's size.

use super::{cosine_similarity, rank, EntryMetadata, IndexEntry, IndexMatch, QueryFilter, VectorIndex};
use crate::error::{Result, StudyError};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS vectors (
        namespace TEXT NOT NULL,
        id TEXT NOT NULL,
        document_id TEXT NOT NULL,
        classroom_id TEXT NOT NULL,
        ordinal INTEGER NOT NULL,
        embedding BLOB NOT NULL,
        PRIMARY KEY (namespace, id)
    );

    CREATE INDEX IF NOT EXISTS idx_vectors_document ON vectors(namespace, document_id);
"#;

/// SQLite-based vector index.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
}

impl SqliteVectorIndex {
    /// Open (or create) the index at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite vector index at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite vector index (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StudyError::Index(format!("Failed to acquire lock: {}", e)))
    }

    /// Serialize embedding to bytes.
    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize embedding from bytes.
    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StudyError::Index(format!("Corrupt id '{}': {}", raw, e)))
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        for entry in entries {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO vectors
                (namespace, id, document_id, classroom_id, ordinal, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    namespace,
                    entry.id,
                    entry.metadata.document_id.to_string(),
                    entry.metadata.classroom_id.to_string(),
                    entry.metadata.ordinal,
                    Self::embedding_to_bytes(&entry.vector),
                ],
            )?;
        }

        tx.commit()?;
        debug!("Upserted {} vectors into {}", entries.len(), namespace);
        Ok(entries.len())
    }

    #[instrument(skip(self, vector, filter))]
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<IndexMatch>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, document_id, classroom_id, ordinal, embedding
            FROM vectors
            WHERE namespace = ?1
            "#,
        )?;

        let rows = stmt.query_map(params![namespace], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Vec<u8>>(4)?,
            ))
        })?;

        let mut matches = Vec::new();
        for row in rows {
            let (id, document_id, classroom_id, ordinal, bytes) = row?;
            let document_id = parse_uuid(&document_id)?;
            if !filter.allows(&document_id) {
                continue;
            }
            matches.push(IndexMatch {
                score: cosine_similarity(vector, &Self::bytes_to_embedding(&bytes)),
                id,
                metadata: EntryMetadata {
                    document_id,
                    classroom_id: parse_uuid(&classroom_id)?,
                    ordinal,
                },
            });
        }

        let ranked = rank(matches, top_k);
        debug!("Found {} matching vectors", ranked.len());
        Ok(ranked)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut deleted = 0;
        for id in ids {
            deleted += tx.execute(
                "DELETE FROM vectors WHERE namespace = ?1 AND id = ?2",
                params![namespace, id],
            )?;
        }
        tx.commit()?;
        debug!("Deleted {} vectors from {}", deleted, namespace);
        Ok(deleted)
    }

    async fn count(&self, namespace: &str, document_id: Uuid) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vectors WHERE namespace = ?1 AND document_id = ?2",
            params![namespace, document_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, vector: Vec<f32>, document_id: Uuid, ordinal: u32) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector,
            metadata: EntryMetadata {
                document_id,
                classroom_id: Uuid::nil(),
                ordinal,
            },
        }
    }

    #[tokio::test]
    async fn test_sqlite_vector_index() {
        let index = SqliteVectorIndex::in_memory().unwrap();
        let doc = Uuid::new_v4();
        let other = Uuid::new_v4();

        index
            .upsert(
                "ns",
                &[
                    entry("c0", vec![1.0, 0.0, 0.0], doc, 0),
                    entry("c1", vec![0.0, 1.0, 0.0], doc, 1),
                    entry("o0", vec![1.0, 0.0, 0.0], other, 0),
                ],
            )
            .await
            .unwrap();

        let results = index
            .query("ns", &[1.0, 0.0, 0.0], 10, &QueryFilter::documents([doc]))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "c0");
        assert!((results[0].score - 1.0).abs() < 0.001);
        assert!(results.iter().all(|m| m.metadata.document_id == doc));

        assert_eq!(index.count("ns", doc).await.unwrap(), 2);
        let deleted = index
            .delete("ns", &["c0".to_string(), "c1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(index.count("ns", doc).await.unwrap(), 0);
        assert_eq!(index.count("ns", other).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reupsert_does_not_duplicate() {
        let index = SqliteVectorIndex::in_memory().unwrap();
        let doc = Uuid::new_v4();
        let batch = vec![entry("c0", vec![1.0, 0.0], doc, 0), entry("c1", vec![0.0, 1.0], doc, 1)];

        index.upsert("ns", &batch).await.unwrap();
        index.upsert("ns", &batch).await.unwrap();
        assert_eq!(index.count("ns", doc).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_file_backed_index_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        let doc = Uuid::new_v4();
        {
            let index = SqliteVectorIndex::new(&path).unwrap();
            index.upsert("ns", &[entry("c0", vec![0.5, 0.5], doc, 0)]).await.unwrap();
        }
        let reopened = SqliteVectorIndex::new(&path).unwrap();
        assert_eq!(reopened.count("ns", doc).await.unwrap(), 1);
    }
}
