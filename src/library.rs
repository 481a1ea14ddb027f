//! The document library: discovery of `.docx` sources on disk and a
//! memoising loader for their parsed paragraphs.
//!
//! Sources are identified by file name. Two roots are searched, the curated
//! documents folder first and the upload folder second; when the same name
//! exists in both, the documents folder wins.
//!
//! Parsing a document is a pure function of its bytes, so parsed results
//! are cached in an LRU keyed by path and validated against the file's
//! modification time and size. The cache lock is never held while parsing.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::docx::{self, ParsedDocument};

/// A `.docx` file found under one of the library roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFile {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Clone)]
struct CachedDocument {
    modified: SystemTime,
    len: u64,
    document: Arc<ParsedDocument>,
}

pub struct DocumentLibrary {
    roots: Vec<PathBuf>,
    upload_dir: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    cache: Mutex<LruCache<PathBuf, CachedDocument>>,
}

impl DocumentLibrary {
    pub fn new(config: &DocumentsConfig) -> Result<Self> {
        let roots = vec![config.folder.clone(), config.upload_dir.clone()];
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1))
            .ok_or_else(|| anyhow::anyhow!("documents.cache_capacity must be > 0"))?;

        Ok(Self {
            roots,
            upload_dir: config.upload_dir.clone(),
            include: build_globset(&["**/*.docx", "**/*.DOCX"])?,
            // Word writes `~$name.docx` owner files next to open documents.
            exclude: build_globset(&["**/~$*", "**/.*"])?,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Lists every `.docx` under the roots, one entry per file name, sorted
    /// by name. Missing roots are skipped.
    pub fn scan(&self) -> Result<Vec<DocumentFile>> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for root in &self.roots {
            if !root.exists() {
                tracing::debug!(root = %root.display(), "document root missing, skipping");
                continue;
            }
            let mut found = Vec::new();
            for entry in WalkDir::new(root).follow_links(true) {
                let entry =
                    entry.with_context(|| format!("walking document root {}", root.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let relative = path.strip_prefix(root).unwrap_or(path);
                let rel_str = relative.to_string_lossy();
                if self.exclude.is_match(rel_str.as_ref()) || !self.include.is_match(rel_str.as_ref())
                {
                    continue;
                }
                let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                    continue;
                };
                found.push(DocumentFile {
                    name,
                    path: path.to_path_buf(),
                });
            }
            found.sort_by(|a, b| a.path.cmp(&b.path));
            for file in found {
                if seen.insert(file.name.clone()) {
                    files.push(file);
                } else {
                    tracing::warn!(
                        name = %file.name,
                        path = %file.path.display(),
                        "duplicate document name, keeping first"
                    );
                }
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Resolves a source name to a file path using the same first-match rule
    /// as [`scan`](Self::scan), so ingestion and evidence lookups always read
    /// the same file. Names with path components or without a `.docx`
    /// extension resolve to `None`.
    pub fn locate(&self, name: &str) -> Result<Option<PathBuf>> {
        let Some(name) = sanitize_file_name(name) else {
            return Ok(None);
        };
        if !docx::is_docx(Path::new(name)) {
            return Ok(None);
        }
        Ok(self
            .scan()?
            .into_iter()
            .find(|f| f.name == name)
            .map(|f| f.path))
    }

    /// Parses `path`, reusing the cached result while the file's mtime and
    /// size are unchanged. Blocking; call from `spawn_blocking` in async code.
    pub fn load(&self, path: &Path) -> Result<Arc<ParsedDocument>> {
        let metadata =
            std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let len = metadata.len();

        {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| anyhow::anyhow!("document cache lock poisoned"))?;
            if let Some(hit) = cache.get(path) {
                if hit.modified == modified && hit.len == len {
                    return Ok(Arc::clone(&hit.document));
                }
                cache.pop(path);
            }
        }

        let document = Arc::new(
            docx::parse_file(path).with_context(|| format!("parsing {}", path.display()))?,
        );
        tracing::debug!(
            path = %path.display(),
            paragraphs = document.len(),
            images = document.image_count(),
            "parsed document"
        );

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| anyhow::anyhow!("document cache lock poisoned"))?;
        cache.put(
            path.to_path_buf(),
            CachedDocument {
                modified,
                len,
                document: Arc::clone(&document),
            },
        );
        Ok(document)
    }

    /// Locates and loads a source by name. `Ok(None)` when no such file exists.
    pub fn load_source(&self, name: &str) -> Result<Option<Arc<ParsedDocument>>> {
        match self.locate(name)? {
            Some(path) => self.load(&path).map(Some),
            None => Ok(None),
        }
    }

    /// Drops every cached document.
    pub fn invalidate_all(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Number of documents currently cached.
    pub fn cached(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// Returns the bare file name if `name` names a file without directory
/// components, `None` otherwise.
pub fn sanitize_file_name(name: &str) -> Option<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains('\0')
    {
        return None;
    }
    Some(trimmed)
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
