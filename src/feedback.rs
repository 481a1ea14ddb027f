//! Append-only feedback log stored as a JSON array on disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackEntry {
    pub question: String,
    pub response: String,
    pub feedback: String,
    pub session_id: String,
    pub timestamp: String,
}

pub struct FeedbackLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FeedbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry. A missing or corrupt log starts over as an empty
    /// array; any other read error aborts the append and leaves the file
    /// untouched. The file is replaced atomically via a sibling temp file.
    pub async fn append(&self, entry: FeedbackEntry) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut entries = self.read_entries().await?;
        entries.push(entry);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_vec_pretty(&entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    pub async fn entries(&self) -> Result<Vec<FeedbackEntry>> {
        let _guard = self.lock.lock().await;
        self.read_entries().await
    }

    async fn read_entries(&self) -> Result<Vec<FeedbackEntry>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "feedback log unreadable, starting a new one");
                Ok(Vec::new())
            }
        }
    }
}
