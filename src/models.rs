//! Core data types shared by ingestion, retrieval and the HTTP layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A window of one paragraph's text, as stored in the vector index.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    /// File name of the source document.
    pub source: String,
    /// Position of the paragraph in the document's paragraph sequence.
    pub para_index: usize,
    /// Position of this window within its paragraph.
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A chunk returned by the retriever, ranked.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub source: String,
    pub para_index: usize,
    pub chunk_index: usize,
    pub text: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Bookkeeping for one ingested document, used to compute ingestion deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedSource {
    /// File name, unique across the documents and upload folders.
    pub name: String,
    pub path: String,
    /// SHA-256 of the file bytes.
    pub content_hash: String,
    pub paragraphs: usize,
    pub chunks: usize,
}

/// Synthetic reference to one inline image:
/// `"<filename>::img<para_index>_<image_offset>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId {
    pub source: String,
    pub para_index: usize,
    pub offset: usize,
}

impl ImageId {
    pub fn new(source: impl Into<String>, para_index: usize, offset: usize) -> Self {
        Self {
            source: source.into(),
            para_index,
            offset,
        }
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::img{}_{}", self.source, self.para_index, self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageIdError(pub String);

impl fmt::Display for ImageIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid image id: {}", self.0)
    }
}

impl std::error::Error for ImageIdError {}

impl FromStr for ImageId {
    type Err = ImageIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ImageIdError(s.to_string());
        let (source, position) = s.rsplit_once("::img").ok_or_else(invalid)?;
        let (para, offset) = position.split_once('_').ok_or_else(invalid)?;
        if source.is_empty() {
            return Err(invalid());
        }
        Ok(ImageId {
            source: source.to_string(),
            para_index: para.parse().map_err(|_| invalid())?,
            offset: offset.parse().map_err(|_| invalid())?,
        })
    }
}

/// Images and links gathered around a set of retrieval hits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence {
    pub image_ids: Vec<ImageId>,
    pub links: Vec<String>,
}

/// A generated answer plus its supporting evidence.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub image_ids: Vec<String>,
    pub related_links: Vec<String>,
}

/// A persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub sender: String,
    pub text: String,
    /// ISO 8601, UTC.
    pub created_at: String,
    #[serde(default)]
    pub image_ids: Vec<String>,
    #[serde(default)]
    pub related_links: Vec<String>,
}

/// One entry of a user's conversation history.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryEntry {
    pub session_id: String,
    pub first_message: String,
}
