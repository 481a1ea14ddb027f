//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` has defaults, so a minimal file only needs
//! the database path. See `config/g2g.example.toml` for all options.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where `.docx` sources live.
#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    /// Watched folder of curated documents.
    #[serde(default = "default_documents_folder")]
    pub folder: PathBuf,
    /// Destination for `POST /upload`. Also scanned during ingestion.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Number of parsed documents kept in memory.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            folder: default_documents_folder(),
            upload_dir: default_upload_dir(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_documents_folder() -> PathBuf {
    PathBuf::from("./documents")
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploaded_docs")
}
fn default_cache_capacity() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks of one paragraph.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Paragraphs shorter than this (trimmed, in characters) are not indexed.
    #[serde(default = "default_min_paragraph_chars")]
    pub min_paragraph_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_paragraph_chars: default_min_paragraph_chars(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_min_paragraph_chars() -> usize {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks returned after MMR re-ranking.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Nearest-neighbour candidates fed to MMR.
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    /// MMR trade-off: 1.0 = pure relevance, 0.0 = pure diversity.
    #[serde(default = "default_lambda_mult")]
    pub lambda_mult: f32,
    /// Paragraphs scanned on each side of a hit for images and links.
    #[serde(default = "default_evidence_window")]
    pub evidence_window: usize,
    /// Chunks retrieved for `/suggest`.
    #[serde(default = "default_suggest_k")]
    pub suggest_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            fetch_k: default_fetch_k(),
            lambda_mult: default_lambda_mult(),
            evidence_window: default_evidence_window(),
            suggest_k: default_suggest_k(),
        }
    }
}

fn default_k() -> usize {
    3
}
fn default_fetch_k() -> usize {
    6
}
fn default_lambda_mult() -> f32 {
    0.8
}
fn default_evidence_window() -> usize {
    3
}
fn default_suggest_k() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Chat-completion backend used for answers and suggestions.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum tokens generated per answer.
    #[serde(default = "default_num_predict")]
    pub num_predict: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            temperature: default_temperature(),
            num_predict: default_num_predict(),
            top_p: default_top_p(),
            repeat_penalty: default_repeat_penalty(),
            max_retries: default_llm_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "llama3.2".to_string()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_num_predict() -> u32 {
    200
}
fn default_top_p() -> f32 {
    0.9
}
fn default_repeat_penalty() -> f32 {
    1.1
}
fn default_llm_max_retries() -> u32 {
    2
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

/// Identity-provider settings for `POST /api/login`.
///
/// Login is rejected unless `jwks_url`, `issuer` and `audience` are all set.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwks_url: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedbackConfig {
    #[serde(default = "default_feedback_path")]
    pub path: PathBuf,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            path: default_feedback_path(),
        }
    }
}

fn default_feedback_path() -> PathBuf {
    PathBuf::from("./data/feedback_log.json")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Checks cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    let chunking = &config.chunking;
    if chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if chunking.chunk_overlap >= chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            chunking.chunk_overlap,
            chunking.chunk_size
        );
    }

    let retrieval = &config.retrieval;
    if retrieval.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if retrieval.fetch_k < retrieval.k {
        anyhow::bail!("retrieval.fetch_k must be >= retrieval.k");
    }
    if !(0.0..=1.0).contains(&retrieval.lambda_mult) {
        anyhow::bail!("retrieval.lambda_mult must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.llm.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let text = format!("[db]\npath = \"/tmp/g2g.sqlite\"\n{}", extra);
        let config: Config = toml::from_str(&text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.chunking.min_paragraph_chars, 30);
        assert_eq!(config.retrieval.k, 3);
        assert_eq!(config.retrieval.fetch_k, 6);
        assert!((config.retrieval.lambda_mult - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.evidence_window, 3);
        assert_eq!(config.llm.model, "llama3.2");
        assert!(config.auth.jwks_url.is_none());
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = parse("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn fetch_k_must_cover_k() {
        let err = parse("[retrieval]\nk = 5\nfetch_k = 2\n").unwrap_err();
        assert!(err.to_string().contains("fetch_k"));
    }

    #[test]
    fn remote_embedding_requires_model_and_dims() {
        let err = parse("[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn unknown_llm_provider_rejected() {
        let err = parse("[llm]\nprovider = \"bard\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }
}
