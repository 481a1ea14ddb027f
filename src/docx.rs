//! Paragraph-aligned extraction of text, inline images and hyperlinks
//! from `.docx` (WordprocessingML) packages.
//!
//! A document is flattened into one [`Paragraph`] per body-level `w:p`
//! element, in document order. Empty paragraphs are kept: the position of a
//! paragraph in [`ParsedDocument::paragraphs`] is the `para_index` recorded
//! on indexed chunks and embedded in image identifiers, so every paragraph
//! must occupy exactly one slot.
//!
//! Images are resolved through `word/_rels/document.xml.rels` and decoded to
//! RGB. An image part that cannot be read or decoded is logged and skipped;
//! it never fails the document. Unknown relationship ids are ignored.

use image::DynamicImage;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCUMENT_PART: &str = "word/document.xml";
const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";
const DOCUMENT_DIR: &str = "word";

/// Elements whose descendant text does not belong to the paragraph's own runs.
const NON_RUN_CONTAINERS: &[&[u8]] = &[b"drawing", b"pict", b"txbxContent", b"oMath"];

/// Fatal extraction error for one document. Callers skip the file.
#[derive(Debug)]
pub enum DocxError {
    Io(String),
    Zip(String),
    Xml(String),
    MissingPart(String),
    TooLarge(String),
}

impl std::fmt::Display for DocxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocxError::Io(e) => write!(f, "failed to read document: {}", e),
            DocxError::Zip(e) => write!(f, "invalid docx package: {}", e),
            DocxError::Xml(e) => write!(f, "malformed document XML: {}", e),
            DocxError::MissingPart(name) => write!(f, "{} not found in package", name),
            DocxError::TooLarge(name) => {
                write!(f, "ZIP entry {} exceeds size limit ({} bytes)", name, MAX_ENTRY_BYTES)
            }
        }
    }
}

impl std::error::Error for DocxError {}

/// One body paragraph: its visible text plus the evidence attached to it.
#[derive(Debug, Clone, Default)]
pub struct Paragraph {
    /// Visible text, leading/trailing whitespace stripped.
    pub text: String,
    /// Inline images in drawing order, normalised to 3-channel RGB.
    pub images: Vec<DynamicImage>,
    /// Hyperlink targets, de-duplicated in first-seen order.
    pub links: Vec<String>,
}

/// The paragraph sequence of a document.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub paragraphs: Vec<Paragraph>,
}

impl ParsedDocument {
    pub fn len(&self) -> usize {
        self.paragraphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Paragraph> {
        self.paragraphs.get(index)
    }

    /// Total number of inline images across all paragraphs.
    pub fn image_count(&self) -> usize {
        self.paragraphs.iter().map(|p| p.images.len()).sum()
    }
}

/// Returns true when the path has a `.docx` extension (case-insensitive).
pub fn is_docx(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("docx"))
        .unwrap_or(false)
}

pub fn parse_file(path: &Path) -> Result<ParsedDocument, DocxError> {
    let bytes =
        std::fs::read(path).map_err(|e| DocxError::Io(format!("{}: {}", path.display(), e)))?;
    parse_bytes(&bytes)
}

pub fn parse_bytes(bytes: &[u8]) -> Result<ParsedDocument, DocxError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| DocxError::Zip(e.to_string()))?;

    let document_xml = read_zip_entry_bounded(&mut archive, DOCUMENT_PART)?
        .ok_or_else(|| DocxError::MissingPart(DOCUMENT_PART.to_string()))?;
    let relationships = match read_zip_entry_bounded(&mut archive, DOCUMENT_RELS_PART)? {
        Some(xml) => parse_relationships(&xml)?,
        None => HashMap::new(),
    };

    let raw_paragraphs = scan_paragraphs(&document_xml)?;

    // Decoded once per relationship id; a failed decode is remembered as None.
    let mut decoded: HashMap<String, Option<DynamicImage>> = HashMap::new();
    let mut paragraphs = Vec::with_capacity(raw_paragraphs.len());

    for raw in raw_paragraphs {
        let mut images = Vec::new();
        for rel_id in &raw.image_rel_ids {
            let Some(rel) = relationships.get(rel_id) else {
                continue;
            };
            if !rel.is_image() {
                continue;
            }
            let image = decoded
                .entry(rel_id.clone())
                .or_insert_with(|| load_image(&mut archive, rel));
            if let Some(img) = image {
                images.push(img.clone());
            }
        }

        let mut links: Vec<String> = Vec::new();
        for rel_id in &raw.link_rel_ids {
            if let Some(rel) = relationships.get(rel_id) {
                if !links.contains(&rel.target) {
                    links.push(rel.target.clone());
                }
            }
        }

        paragraphs.push(Paragraph {
            text: raw.text.trim().to_string(),
            images,
            links,
        });
    }

    Ok(ParsedDocument { paragraphs })
}

/// Reads a ZIP entry, returning `Ok(None)` if the entry does not exist.
fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<Vec<u8>>, DocxError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(DocxError::Zip(e.to_string())),
    };
    let mut out = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| DocxError::Zip(e.to_string()))?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(DocxError::TooLarge(name.to_string()));
    }
    Ok(Some(out))
}

// ============ Relationships ============

#[derive(Debug, Clone)]
struct Relationship {
    rel_type: String,
    target: String,
    external: bool,
}

impl Relationship {
    fn is_image(&self) -> bool {
        !self.external && self.rel_type.ends_with("/image")
    }
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, Relationship>, DocxError> {
    let mut rels = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let id = attribute(&e, b"Id");
                    let target = attribute(&e, b"Target");
                    if let (Some(id), Some(target)) = (id, target) {
                        let external = attribute(&e, b"TargetMode")
                            .map(|m| m.eq_ignore_ascii_case("External"))
                            .unwrap_or(false);
                        rels.insert(
                            id,
                            Relationship {
                                rel_type: attribute(&e, b"Type").unwrap_or_default(),
                                target,
                                external,
                            },
                        );
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DocxError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

/// Looks up an attribute by local name (namespace prefix ignored).
fn attribute(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == local {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

/// Resolves a relationship target relative to the `word/` directory into a
/// package part name, handling `..` segments and absolute targets.
fn resolve_part_name(base_dir: &str, target: &str) -> String {
    let mut segments: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

fn load_image(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    rel: &Relationship,
) -> Option<DynamicImage> {
    let part = resolve_part_name(DOCUMENT_DIR, &rel.target);
    let bytes = match read_zip_entry_bounded(archive, &part) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            tracing::warn!(part = %part, "image part missing from package");
            return None;
        }
        Err(e) => {
            tracing::warn!(part = %part, error = %e, "failed to read image part");
            return None;
        }
    };
    match image::load_from_memory(&bytes) {
        Ok(img) => Some(DynamicImage::ImageRgb8(img.to_rgb8())),
        Err(e) => {
            tracing::warn!(part = %part, error = %e, "failed to decode image");
            None
        }
    }
}

// ============ Paragraph scan ============

#[derive(Debug, Default)]
struct RawParagraph {
    text: String,
    image_rel_ids: Vec<String>,
    link_rel_ids: Vec<String>,
}

/// Walks `word/document.xml` and collects one [`RawParagraph`] per
/// body-level `w:p`. Paragraphs nested in tables, text boxes or other
/// containers are part of neither the sequence nor their parent's text.
fn scan_paragraphs(xml: &[u8]) -> Result<Vec<RawParagraph>, DocxError> {
    let mut out = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<RawParagraph> = None;
    // Stack depth at which the current body paragraph was opened.
    let mut para_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if let Some(para) = current.as_mut() {
                    collect_element(&e, &stack[para_depth..], para);
                } else if name == b"p" && is_body(&stack) {
                    current = Some(RawParagraph::default());
                    para_depth = stack.len() + 1;
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                if let Some(para) = current.as_mut() {
                    collect_element(&e, &stack[para_depth..], para);
                } else if e.local_name().as_ref() == b"p" && is_body(&stack) {
                    out.push(RawParagraph::default());
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
                if current.is_some() && stack.len() + 1 == para_depth {
                    if let Some(para) = current.take() {
                        out.push(para);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(para) = current.as_mut() {
                    let inner = &stack[para_depth..];
                    if inner.last().map(|n| n.as_slice() == b"t").unwrap_or(false)
                        && !within(inner, NON_RUN_CONTAINERS)
                    {
                        let text = t.unescape().map_err(|e| DocxError::Xml(e.to_string()))?;
                        para.text.push_str(&text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DocxError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn is_body(stack: &[Vec<u8>]) -> bool {
    stack.last().map(|n| n.as_slice() == b"body").unwrap_or(false)
}

fn within(stack: &[Vec<u8>], names: &[&[u8]]) -> bool {
    stack.iter().any(|n| names.contains(&n.as_slice()))
}

/// Records images, links and run-level whitespace for an element opened
/// inside a body paragraph. `inner` is the element path below the `w:p`.
fn collect_element(e: &BytesStart<'_>, inner: &[Vec<u8>], para: &mut RawParagraph) {
    let parent_is_run = inner.last().map(|n| n.as_slice() == b"r").unwrap_or(false);
    match e.local_name().as_ref() {
        b"blip" if within(inner, &[b"drawing"]) => {
            if let Some(id) = attribute(e, b"embed") {
                para.image_rel_ids.push(id);
            }
        }
        b"hyperlink" => {
            if let Some(id) = attribute(e, b"id") {
                para.link_rel_ids.push(id);
            }
        }
        b"tab" if parent_is_run && !within(inner, NON_RUN_CONTAINERS) => para.text.push('\t'),
        b"br" | b"cr" if parent_is_run && !within(inner, NON_RUN_CONTAINERS) => {
            para.text.push('\n')
        }
        _ => {}
    }
}
