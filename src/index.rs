//! Vector index over paragraph chunks.
//!
//! The [`VectorIndex`] trait is the storage seam for ingestion and
//! retrieval. [`SqliteIndex`] persists chunks with their embeddings and
//! answers nearest-neighbour queries with a brute-force cosine scan;
//! [`MemoryIndex`] keeps everything in process for tests and one-shot runs.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, IndexedSource, RetrievedChunk};

/// A chunk paired with its embedding, ready to be stored.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A nearest-neighbour hit. The vector is kept for MMR re-ranking.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: RetrievedChunk,
    pub vector: Vec<f32>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// All sources currently indexed, ordered by name.
    async fn indexed_sources(&self) -> Result<Vec<IndexedSource>>;

    /// Atomically replaces every chunk of `source.name` with `chunks` and
    /// records the source.
    async fn replace_source(&self, source: &IndexedSource, chunks: &[IndexedChunk]) -> Result<()>;

    /// Removes a source and all of its chunks. Unknown names are a no-op.
    async fn remove_source(&self, name: &str) -> Result<()>;

    /// Returns at most `limit` chunks ordered by descending cosine similarity.
    async fn nearest(&self, query_vec: &[f32], limit: usize) -> Result<Vec<Candidate>>;

    /// Total number of stored chunks.
    async fn chunk_count(&self) -> Result<usize>;
}

fn rank(mut candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.chunk
            .score
            .partial_cmp(&a.chunk.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(limit);
    candidates
}

// ============ SQLite ============

/// Persistent index in the `sources` and `chunks` tables.
///
/// Only vectors produced by `model` are searched, so switching embedding
/// models never mixes incompatible vector spaces.
pub struct SqliteIndex {
    pool: SqlitePool,
    model: String,
    dims: usize,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool, model: impl Into<String>, dims: usize) -> Self {
        Self {
            pool,
            model: model.into(),
            dims,
        }
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn indexed_sources(&self) -> Result<Vec<IndexedSource>> {
        let rows = sqlx::query(
            "SELECT name, path, content_hash, paragraphs, chunks FROM sources ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| IndexedSource {
                name: row.get("name"),
                path: row.get("path"),
                content_hash: row.get("content_hash"),
                paragraphs: row.get::<i64, _>("paragraphs") as usize,
                chunks: row.get::<i64, _>("chunks") as usize,
            })
            .collect())
    }

    async fn replace_source(&self, source: &IndexedSource, chunks: &[IndexedChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE source = ?")
            .bind(&source.name)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO sources (name, path, content_hash, paragraphs, chunks, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                path = excluded.path,
                content_hash = excluded.content_hash,
                paragraphs = excluded.paragraphs,
                chunks = excluded.chunks,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&source.name)
        .bind(&source.path)
        .bind(&source.content_hash)
        .bind(source.paragraphs as i64)
        .bind(source.chunks as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        for entry in chunks {
            let chunk = &entry.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source, para_index, chunk_index, text, hash, model, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.source)
            .bind(chunk.para_index as i64)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(&self.model)
            .bind(self.dims as i64)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remove_source(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE source = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sources WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn nearest(&self, query_vec: &[f32], limit: usize) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            r#"
            SELECT source, para_index, chunk_index, text, embedding
            FROM chunks
            WHERE model = ?
            "#,
        )
        .bind(&self.model)
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let score = cosine_similarity(query_vec, &vector);
                Candidate {
                    chunk: RetrievedChunk {
                        source: row.get("source"),
                        para_index: row.get::<i64, _>("para_index") as usize,
                        chunk_index: row.get::<i64, _>("chunk_index") as usize,
                        text: row.get("text"),
                        score,
                    },
                    vector,
                }
            })
            .collect();

        Ok(rank(candidates, limit))
    }

    async fn chunk_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

// ============ In-memory ============

#[derive(Default)]
struct MemoryState {
    sources: BTreeMap<String, IndexedSource>,
    chunks: BTreeMap<String, Vec<IndexedChunk>>,
}

/// Non-persistent [`VectorIndex`].
#[derive(Default)]
pub struct MemoryIndex {
    state: RwLock<MemoryState>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn indexed_sources(&self) -> Result<Vec<IndexedSource>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.sources.values().cloned().collect())
    }

    async fn replace_source(&self, source: &IndexedSource, chunks: &[IndexedChunk]) -> Result<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.sources.insert(source.name.clone(), source.clone());
        state.chunks.insert(source.name.clone(), chunks.to_vec());
        Ok(())
    }

    async fn remove_source(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.sources.remove(name);
        state.chunks.remove(name);
        Ok(())
    }

    async fn nearest(&self, query_vec: &[f32], limit: usize) -> Result<Vec<Candidate>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let candidates = state
            .chunks
            .values()
            .flatten()
            .map(|entry| Candidate {
                chunk: RetrievedChunk {
                    source: entry.chunk.source.clone(),
                    para_index: entry.chunk.para_index,
                    chunk_index: entry.chunk.chunk_index,
                    text: entry.chunk.text.clone(),
                    score: cosine_similarity(query_vec, &entry.vector),
                },
                vector: entry.vector.clone(),
            })
            .collect();
        Ok(rank(candidates, limit))
    }

    async fn chunk_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.chunks.values().map(Vec::len).sum())
    }
}
