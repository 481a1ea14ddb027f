//! Ingestion pipeline orchestration.
//!
//! Coordinates the sync flow: library scan → parse → chunk → embed →
//! index. Runs are deltas against the `sources` table: new documents are
//! indexed, documents whose bytes changed are re-indexed in one
//! transaction, documents that disappeared are pruned and unchanged
//! documents are skipped. A document that fails to parse is reported and
//! skipped; the run continues.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::chunk::{chunk_paragraph, Splitter};
use crate::config::ChunkingConfig;
use crate::docx::ParsedDocument;
use crate::embedding::{embed_batched, EmbeddingProvider};
use crate::index::{IndexedChunk, VectorIndex};
use crate::library::{DocumentFile, DocumentLibrary};
use crate::models::{Chunk, IndexedSource};

/// Outcome of one ingestion run.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    pub scanned: usize,
    pub ingested: usize,
    pub unchanged: usize,
    pub pruned: usize,
    /// `(file name, error)` for every document that could not be parsed.
    pub failed: Vec<(String, String)>,
    pub chunks_written: usize,
}

impl IngestReport {
    pub fn print(&self, full: bool) {
        println!("ingest{}", if full { " (full)" } else { "" });
        println!("  scanned: {} documents", self.scanned);
        println!("  ingested: {}", self.ingested);
        println!("  unchanged: {}", self.unchanged);
        println!("  pruned: {}", self.pruned);
        println!("  chunks written: {}", self.chunks_written);
        if !self.failed.is_empty() {
            println!("  failed: {}", self.failed.len());
            for (name, err) in &self.failed {
                println!("    {}: {}", name, err);
            }
        }
        println!("ok");
    }
}

/// Everything ingestion needs, borrowed from the caller.
pub struct Ingestor<'a> {
    pub library: &'a Arc<DocumentLibrary>,
    pub index: &'a dyn VectorIndex,
    pub embedder: &'a dyn EmbeddingProvider,
    pub chunking: &'a ChunkingConfig,
    pub batch_size: usize,
}

impl Ingestor<'_> {
    /// Brings the index in line with the documents on disk. With `full`,
    /// every document is re-indexed regardless of its hash.
    pub async fn run(&self, full: bool) -> Result<IngestReport> {
        let library = Arc::clone(self.library);
        let files = tokio::task::spawn_blocking(move || library.scan()).await??;

        let indexed: HashMap<String, IndexedSource> = self
            .index
            .indexed_sources()
            .await?
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();

        let mut report = IngestReport {
            scanned: files.len(),
            ..IngestReport::default()
        };

        let present: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
        for name in indexed.keys() {
            if !present.contains(name.as_str()) {
                self.index.remove_source(name).await?;
                tracing::info!(source = %name, "pruned missing document");
                report.pruned += 1;
            }
        }

        for file in &files {
            let content_hash = hash_file(file).await?;
            if !full {
                if let Some(existing) = indexed.get(&file.name) {
                    if existing.content_hash == content_hash {
                        report.unchanged += 1;
                        continue;
                    }
                }
            }

            let library = Arc::clone(self.library);
            let path = file.path.clone();
            let document = match tokio::task::spawn_blocking(move || library.load(&path)).await? {
                Ok(document) => document,
                Err(e) => {
                    let msg = format!("{:#}", e);
                    tracing::warn!(source = %file.name, error = %msg, "skipping unparseable document");
                    if indexed.contains_key(&file.name) {
                        self.index.remove_source(&file.name).await?;
                        tracing::warn!(source = %file.name, "dropped chunks of a document that no longer parses");
                    }
                    report.failed.push((file.name.clone(), msg));
                    continue;
                }
            };

            let written = self.index_document(file, &content_hash, &document).await?;
            tracing::info!(source = %file.name, chunks = written, "indexed document");
            report.ingested += 1;
            report.chunks_written += written;
        }

        Ok(report)
    }

    async fn index_document(
        &self,
        file: &DocumentFile,
        content_hash: &str,
        document: &ParsedDocument,
    ) -> Result<usize> {
        let chunks = chunk_document(self.chunking, &file.name, document);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.embedder, &texts, self.batch_size)
            .await
            .with_context(|| format!("embedding chunks of {}", file.name))?;

        let entries: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedChunk { chunk, vector })
            .collect();

        let record = IndexedSource {
            name: file.name.clone(),
            path: file.path.display().to_string(),
            content_hash: content_hash.to_string(),
            paragraphs: document.len(),
            chunks: entries.len(),
        };
        self.index.replace_source(&record, &entries).await?;
        Ok(entries.len())
    }
}

/// Splits every sufficiently long paragraph of `document` into chunks.
///
/// Paragraphs whose trimmed text is shorter than `min_paragraph_chars`
/// characters are not indexed; their images and links still surface
/// through neighbouring hits.
pub fn chunk_document(config: &ChunkingConfig, source: &str, document: &ParsedDocument) -> Vec<Chunk> {
    let splitter = Splitter::new(config.chunk_size, config.chunk_overlap);
    document
        .paragraphs
        .iter()
        .enumerate()
        .filter(|(_, p)| p.text.trim().chars().count() >= config.min_paragraph_chars)
        .flat_map(|(i, p)| chunk_paragraph(&splitter, source, i, &p.text))
        .collect()
}

async fn hash_file(file: &DocumentFile) -> Result<String> {
    let bytes = tokio::fs::read(&file.path)
        .await
        .with_context(|| format!("reading {}", file.path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
