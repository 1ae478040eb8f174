use parking_lot::Mutex;
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use muster_core::{MusterError, Result};
use muster_llm::EmbeddingProvider;

/// Default and maximum result counts for similarity search.
const DEFAULT_K: usize = 5;
const MAX_K: usize = 100;

/// One search result: content plus similarity in `[0, 1]` (higher = closer).
#[derive(Debug, Clone, Serialize)]
pub struct MemoryHit {
    pub id: i64,
    pub agent_id: String,
    pub content: String,
    pub similarity: f32,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

/// Append-only vector memory over SQLite.
///
/// The embedding dimension is fixed when the store is opened; writes with a
/// different dimension are rejected. Vectors are unit-normalized on write so
/// ranking is plain cosine. Metadata is opaque — persisted and returned
/// unchanged, never ranked on.
pub struct MemoryService {
    db: Arc<Mutex<Connection>>,
    dims: usize,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for MemoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryService")
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

impl MemoryService {
    /// Open or create the memory database at the given path.
    pub fn open(
        path: &Path,
        dims: usize,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        info!(?path, dims, "opening memory store");
        if dims == 0 {
            return Err(MusterError::Config("embedding dimension must be non-zero".into()));
        }
        if embedder.dimensions() != dims {
            return Err(MusterError::Config(format!(
                "embedding model produces {} dims, store configured for {}",
                embedder.dimensions(),
                dims
            )));
        }

        let conn = Connection::open(path).map_err(store_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(store_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_agent ON memories(agent_id);
            CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);",
        )
        .map_err(store_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            dims,
            embedder,
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory(dims: usize, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::open(Path::new(":memory:"), dims, embedder)
    }

    /// Embed and persist one memory. Returns the new row id.
    ///
    /// Embedding failure and persistence failure surface as distinct errors
    /// so callers can degrade — a conversation turn still replies when only
    /// the embedding endpoint is down.
    pub async fn store(
        &self,
        agent_id: &str,
        content: &str,
        metadata: serde_json::Value,
    ) -> Result<i64> {
        if agent_id.is_empty() {
            return Err(MusterError::Config("agent_id is mandatory".into()));
        }
        if content.is_empty() {
            return Err(MusterError::Config("memory content must be non-empty".into()));
        }

        let embedding = self.embed_one(content).await?;

        let metadata_json = serde_json::to_string(&metadata)?;
        let created_at = chrono::Utc::now().to_rfc3339();
        let blob = encode_embedding(&embedding);

        let db = self.db.lock();
        db.execute(
            "INSERT INTO memories (agent_id, content, embedding, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![agent_id, content, blob, metadata_json, created_at],
        )
        .map_err(store_err)?;
        let id = db.last_insert_rowid();
        debug!(agent = agent_id, id, "stored memory");
        Ok(id)
    }

    /// Top-k cosine search. `agent_id = None` searches across all agents.
    /// `k = None` defaults to 5; the hard cap is 100. Ties keep insertion
    /// order (earlier rows first).
    pub async fn search(
        &self,
        agent_id: Option<&str>,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<MemoryHit>> {
        let k = k.unwrap_or(DEFAULT_K).min(MAX_K);
        if k == 0 {
            return Ok(vec![]);
        }
        let query_embedding = self.embed_one(query).await?;

        let rows = self.load_rows(agent_id)?;
        let mut hits: Vec<MemoryHit> = rows
            .into_iter()
            .filter_map(|row| {
                let embedding = decode_embedding(&row.embedding)?;
                let similarity = cosine_similarity(&query_embedding, &embedding);
                Some(MemoryHit {
                    id: row.id,
                    agent_id: row.agent_id,
                    content: row.content,
                    similarity,
                    metadata: serde_json::from_str(&row.metadata)
                        .unwrap_or(serde_json::Value::Null),
                    created_at: row.created_at,
                })
            })
            .collect();

        // Stable sort over id-ordered rows: equal similarity keeps insertion order.
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Recent memories, newest first, without similarity ranking.
    pub fn recent(&self, agent_id: Option<&str>, limit: usize) -> Result<Vec<MemoryHit>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT id, agent_id, content, metadata, created_at FROM memories
                 WHERE (?1 IS NULL OR agent_id = ?1)
                 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(rusqlite::params![agent_id, limit as i64], |row| {
                Ok(MemoryHit {
                    id: row.get(0)?,
                    agent_id: row.get(1)?,
                    content: row.get(2)?,
                    similarity: 0.0,
                    metadata: serde_json::from_str::<serde_json::Value>(
                        &row.get::<_, String>(3)?,
                    )
                    .unwrap_or(serde_json::Value::Null),
                    created_at: row.get(4)?,
                })
            })
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Delete one memory by id. Returns true when a row was removed.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let db = self.db.lock();
        let rows = db
            .execute("DELETE FROM memories WHERE id = ?1", rusqlite::params![id])
            .map_err(store_err)?;
        Ok(rows > 0)
    }

    /// Remove every memory belonging to an agent. Returns the count removed.
    pub fn clear_agent(&self, agent_id: &str) -> Result<usize> {
        let db = self.db.lock();
        let rows = db
            .execute(
                "DELETE FROM memories WHERE agent_id = ?1",
                rusqlite::params![agent_id],
            )
            .map_err(store_err)?;
        info!(agent = agent_id, removed = rows, "cleared agent memories");
        Ok(rows)
    }

    /// Total rows stored.
    pub fn count(&self) -> Result<usize> {
        let db = self.db.lock();
        db.query_row("SELECT COUNT(*) FROM memories", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as usize)
        .map_err(store_err)
    }

    /// Round-trip a trivial query against the backing store.
    pub fn health(&self) -> Result<()> {
        let db = self.db.lock();
        db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(store_err)
    }

    /// The configured embedding dimension.
    pub fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embedder.embed(&[text]).await?;
        let mut v = vectors
            .pop()
            .ok_or_else(|| MusterError::EmbeddingUnavailable("no embedding returned".into()))?;
        if v.len() != self.dims {
            return Err(MusterError::Config(format!(
                "embedding dimension mismatch: got {}, store requires {}",
                v.len(),
                self.dims
            )));
        }
        normalize(&mut v);
        Ok(v)
    }

    fn load_rows(&self, agent_id: Option<&str>) -> Result<Vec<RawRow>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT id, agent_id, content, embedding, metadata, created_at FROM memories
                 WHERE (?1 IS NULL OR agent_id = ?1)
                 ORDER BY id ASC",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(rusqlite::params![agent_id], |row| {
                Ok(RawRow {
                    id: row.get(0)?,
                    agent_id: row.get(1)?,
                    content: row.get(2)?,
                    embedding: row.get(3)?,
                    metadata: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

struct RawRow {
    id: i64,
    agent_id: String,
    content: String,
    embedding: Vec<u8>,
    metadata: String,
    created_at: String,
}

fn store_err(e: rusqlite::Error) -> MusterError {
    MusterError::StoreUnavailable(e.to_string())
}

/// Serialize an embedding as little-endian f32 bytes.
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize an embedding from LE f32 bytes.
fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Compute cosine similarity between two vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_blob_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.0];
        let blob = encode_embedding(&v);
        assert_eq!(decode_embedding(&blob).unwrap(), v);
        assert!(decode_embedding(&blob[..5]).is_none());
    }

    #[test]
    fn cosine_basics() {
        let a = [1.0, 0.0];
        let b = [1.0, 0.0];
        let c = [0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }
}
