//! Recursive character splitter for paragraph text.
//!
//! Splits a paragraph into windows of at most `chunk_size` characters,
//! preferring to break on blank lines, then newlines, then spaces, and
//! finally between characters. Consecutive windows share up to
//! `chunk_overlap` characters so that a sentence straddling a boundary is
//! retrievable from either side. Separators stay attached to the start of
//! the piece that follows them.
//!
//! Lengths are counted in characters, not bytes.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Splitter settings. `chunk_overlap` must be smaller than `chunk_size`.
#[derive(Debug, Clone, Copy)]
pub struct Splitter {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Splitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Splits `text` into overlapping windows. Returns nothing for
    /// whitespace-only input.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // Pick the first separator present in the text; "" always matches.
        let mut separator = "";
        let mut finer: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                finer = &[];
                break;
            }
            if text.contains(sep) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut out = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        for piece in split_keep_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                out.extend(self.merge(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            } else {
                out.extend(self.split_recursive(&piece, finer));
            }
        }
        if !pending.is_empty() {
            out.extend(self.merge(&pending));
        }
        out
    }

    /// Greedily packs small pieces into windows, carrying a tail of at most
    /// `chunk_overlap` characters into the next window.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut docs, &window);
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    let first = window.remove(0);
                    total -= char_len(first);
                }
            }
            window.push(piece);
            total += len;
        }
        push_joined(&mut docs, &window);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, window: &[&str]) {
    let joined: String = window.concat();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Splits on `separator`, keeping each separator at the start of the piece
/// that follows it. An empty separator splits into single characters.
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(|c| c.to_string()).collect();
    }
    let mut out = Vec::new();
    for (i, part) in text.split(separator).enumerate() {
        let piece = if i == 0 {
            part.to_string()
        } else {
            format!("{}{}", separator, part)
        };
        if !piece.is_empty() {
            out.push(piece);
        }
    }
    out
}

/// Splits one paragraph into indexable [`Chunk`]s.
pub fn chunk_paragraph(
    splitter: &Splitter,
    source: &str,
    para_index: usize,
    text: &str,
) -> Vec<Chunk> {
    splitter
        .split(text)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(source, para_index, i, piece))
        .collect()
}

fn make_chunk(source: &str, para_index: usize, chunk_index: usize, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        source: source.to_string(),
        para_index,
        chunk_index,
        text,
        hash,
    }
}
