//! Evidence reconciliation: mapping retrieval hits back to the images and
//! hyperlinks of the paragraphs around them, and serving those images.
//!
//! All functions here touch the filesystem and may parse documents; call
//! them from blocking contexts.

use anyhow::Result;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;

use crate::library::{sanitize_file_name, DocumentLibrary};
use crate::models::{Evidence, ImageId, RetrievedChunk};

/// Collects image ids and links from `[para_index - window, para_index +
/// window]` around every hit, clipped to the document bounds.
///
/// Both lists are de-duplicated in first-seen order. A hit whose document
/// is missing or cannot be parsed contributes nothing.
pub fn reconcile(library: &DocumentLibrary, hits: &[RetrievedChunk], window: usize) -> Evidence {
    let mut evidence = Evidence::default();
    let mut seen_images = HashSet::new();
    let mut seen_links = HashSet::new();

    for hit in hits {
        let document = match library.load_source(&hit.source) {
            Ok(Some(document)) => document,
            Ok(None) => {
                tracing::warn!(source = %hit.source, "source document not found, skipping evidence");
                continue;
            }
            Err(e) => {
                tracing::warn!(source = %hit.source, error = %format!("{:#}", e), "failed to load source document");
                continue;
            }
        };
        if document.is_empty() {
            continue;
        }

        let start = hit.para_index.saturating_sub(window);
        let end = hit
            .para_index
            .saturating_add(window)
            .min(document.len() - 1);
        if start > end {
            continue;
        }

        for para_index in start..=end {
            let paragraph = &document.paragraphs[para_index];
            for offset in 0..paragraph.images.len() {
                let id = ImageId::new(hit.source.clone(), para_index, offset);
                if seen_images.insert(id.clone()) {
                    evidence.image_ids.push(id);
                }
            }
            for link in &paragraph.links {
                if seen_links.insert(link.clone()) {
                    evidence.links.push(link.clone());
                }
            }
        }
    }

    evidence
}

/// Image bytes ready to be served.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Resolves an image id to bytes.
///
/// Images embedded in a `.docx` are re-encoded as PNG. An uploaded image
/// file is addressed as `<name>::img0_0` and served as stored. Returns
/// `Ok(None)` for unknown files and out-of-range positions.
pub fn load_image(library: &DocumentLibrary, id: &ImageId) -> Result<Option<ImagePayload>> {
    if let Some(content_type) = image_content_type(&id.source) {
        if id.para_index != 0 || id.offset != 0 {
            return Ok(None);
        }
        let Some(name) = sanitize_file_name(&id.source) else {
            return Ok(None);
        };
        let path = library.upload_dir().join(name);
        if !path.is_file() {
            return Ok(None);
        }
        return Ok(Some(ImagePayload {
            bytes: std::fs::read(&path)?,
            content_type,
        }));
    }

    let Some(document) = library.load_source(&id.source)? else {
        return Ok(None);
    };
    let Some(image) = document
        .get(id.para_index)
        .and_then(|p| p.images.get(id.offset))
    else {
        return Ok(None);
    };

    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png)?;
    Ok(Some(ImagePayload {
        bytes: out.into_inner(),
        content_type: "image/png",
    }))
}

/// Links attached to one paragraph. `Ok(None)` for unknown files and
/// out-of-range indices.
pub fn paragraph_links(
    library: &DocumentLibrary,
    source: &str,
    para_index: usize,
) -> Result<Option<Vec<String>>> {
    let Some(document) = library.load_source(source)? else {
        return Ok(None);
    };
    Ok(document.get(para_index).map(|p| p.links.clone()))
}

/// MIME type for stand-alone image uploads, by extension.
pub fn image_content_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
