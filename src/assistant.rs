//! The [`Assistant`]: one explicitly constructed context owning the
//! document library, vector index, embedder and chat model, and exposing
//! the question-answering operations used by the CLI and HTTP server.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::{ChunkingConfig, Config, RetrievalConfig};
use crate::embedding::{self, EmbeddingProvider};
use crate::evidence::{self, ImagePayload};
use crate::index::{SqliteIndex, VectorIndex};
use crate::ingest::{IngestReport, Ingestor};
use crate::library::DocumentLibrary;
use crate::llm::{self, ChatModel};
use crate::models::{Answer, ImageId, RetrievedChunk};
use crate::prompt;
use crate::retrieve::{self, MmrParams};

pub struct Assistant {
    library: Arc<DocumentLibrary>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatModel>,
    chunking: ChunkingConfig,
    retrieval: RetrievalConfig,
    batch_size: usize,
    // Serialises ingestion runs triggered by uploads and reloads.
    ingest_lock: tokio::sync::Mutex<()>,
}

impl Assistant {
    pub fn new(
        config: &Config,
        library: Arc<DocumentLibrary>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            library,
            index,
            embedder,
            chat,
            chunking: config.chunking.clone(),
            retrieval: config.retrieval.clone(),
            batch_size: config.embedding.batch_size,
            ingest_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Builds the production wiring: SQLite index plus the configured
    /// embedding and chat providers.
    pub fn from_config(config: &Config, pool: SqlitePool) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::from(embedding::create_provider(&config.embedding)?);
        let chat: Arc<dyn ChatModel> = Arc::from(llm::create_chat_model(&config.llm)?);
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteIndex::new(
            pool,
            embedder.model_name(),
            embedder.dims(),
        ));
        let library = Arc::new(DocumentLibrary::new(&config.documents)?);
        tracing::info!(
            embedding_model = embedder.model_name(),
            chat_model = chat.model_name(),
            "assistant ready"
        );
        Ok(Self::new(config, library, index, embedder, chat))
    }

    pub fn library(&self) -> &Arc<DocumentLibrary> {
        &self.library
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Runs a delta ingestion (or a full one with `full`).
    pub async fn ingest(&self, full: bool) -> Result<IngestReport> {
        let _guard = self.ingest_lock.lock().await;
        Ingestor {
            library: &self.library,
            index: self.index.as_ref(),
            embedder: self.embedder.as_ref(),
            chunking: &self.chunking,
            batch_size: self.batch_size,
        }
        .run(full)
        .await
    }

    /// Drops cached documents and re-ingests whatever changed on disk.
    pub async fn reload(&self) -> Result<IngestReport> {
        self.library.invalidate_all();
        let report = self.ingest(false).await?;
        tracing::info!(
            ingested = report.ingested,
            pruned = report.pruned,
            failed = report.failed.len(),
            "reloaded document index"
        );
        Ok(report)
    }

    /// MMR retrieval of `k` chunks for `query`.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let params = MmrParams {
            k,
            ..MmrParams::from(&self.retrieval)
        };
        retrieve::retrieve(self.index.as_ref(), self.embedder.as_ref(), query, params).await
    }

    /// Answers `question` from the indexed documents and attaches the
    /// images and links found around the supporting paragraphs.
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let hits = self
            .retrieve(question, self.retrieval.k)
            .await
            .context("retrieving context")?;
        tracing::debug!(
            hits = hits.len(),
            model = self.chat.model_name(),
            "retrieved context for question"
        );

        let reply = self
            .chat
            .complete(&prompt::answer_prompt(question, &hits))
            .await
            .context("generating answer")?;

        let library = Arc::clone(&self.library);
        let window = self.retrieval.evidence_window;
        let evidence =
            tokio::task::spawn_blocking(move || evidence::reconcile(&library, &hits, window))
                .await?;

        Ok(Answer {
            answer: reply,
            image_ids: evidence.image_ids.iter().map(ToString::to_string).collect(),
            related_links: evidence.links,
        })
    }

    /// Two or three follow-up questions grounded in the chunks nearest `q`.
    pub async fn suggest(&self, q: &str) -> Result<Vec<String>> {
        let hits = self.retrieve(q, self.retrieval.suggest_k).await?;
        if hits.is_empty() {
            return Ok(prompt::DEFAULT_SUGGESTIONS
                .iter()
                .map(|s| s.to_string())
                .collect());
        }
        let raw = self.chat.complete(&prompt::suggestion_prompt(&hits)).await?;
        Ok(prompt::parse_suggestions(&raw))
    }

    pub async fn image(&self, id: ImageId) -> Result<Option<ImagePayload>> {
        let library = Arc::clone(&self.library);
        tokio::task::spawn_blocking(move || evidence::load_image(&library, &id)).await?
    }

    pub async fn links(&self, source: &str, para_index: usize) -> Result<Option<Vec<String>>> {
        let library = Arc::clone(&self.library);
        let source = source.to_string();
        tokio::task::spawn_blocking(move || evidence::paragraph_links(&library, &source, para_index))
            .await?
    }
}
