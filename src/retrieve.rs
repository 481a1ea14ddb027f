//! Query-time retrieval: nearest-neighbour candidates re-ranked with
//! Maximal Marginal Relevance.
//!
//! The first pick is the candidate most similar to the query. Each later
//! pick maximises
//!
//! ```text
//! λ · sim(q, c) − (1 − λ) · max_{s ∈ selected} sim(c, s)
//! ```
//!
//! so `λ = 1` reproduces plain similarity order and smaller values push
//! near-duplicates of already selected chunks down the list.

use anyhow::Result;

use crate::config::RetrievalConfig;
use crate::embedding::{cosine_similarity, embed_query, EmbeddingProvider};
use crate::index::{Candidate, VectorIndex};
use crate::models::RetrievedChunk;

/// Retrieval knobs for one query.
#[derive(Debug, Clone, Copy)]
pub struct MmrParams {
    pub k: usize,
    pub fetch_k: usize,
    pub lambda_mult: f32,
}

impl From<&RetrievalConfig> for MmrParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            k: config.k,
            fetch_k: config.fetch_k,
            lambda_mult: config.lambda_mult,
        }
    }
}

/// Embeds `query`, fetches `fetch_k` neighbours and returns the MMR
/// selection of at most `k` chunks.
pub async fn retrieve(
    index: &dyn VectorIndex,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    params: MmrParams,
) -> Result<Vec<RetrievedChunk>> {
    let query_vec = embed_query(embedder, query).await?;
    let candidates = index.nearest(&query_vec, params.fetch_k.max(params.k)).await?;
    tracing::debug!(candidates = candidates.len(), "retrieved neighbours");
    Ok(mmr(&query_vec, candidates, params.k, params.lambda_mult))
}

/// Selects up to `k` candidates by Maximal Marginal Relevance.
///
/// The returned chunks keep their query similarity as `score`, in
/// selection order.
pub fn mmr(query_vec: &[f32], candidates: Vec<Candidate>, k: usize, lambda: f32) -> Vec<RetrievedChunk> {
    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query_vec, &c.vector))
        .collect();

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(&candidates[idx].vector, &candidates[s].vector))
                .fold(f32::NEG_INFINITY, f32::max);
            let score = if selected.is_empty() {
                relevance[idx]
            } else {
                lambda * relevance[idx] - (1.0 - lambda) * redundancy
            };
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        selected.push(remaining.remove(best_pos));
    }

    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    selected
        .into_iter()
        .filter_map(|idx| {
            slots[idx].take().map(|c| RetrievedChunk {
                score: relevance[idx],
                ..c.chunk
            })
        })
        .collect()
}
