//! Shared fixtures for the integration tests: `.docx` builders, a
//! deterministic embedder and a canned chat model.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use guide2govern::assistant::Assistant;
use guide2govern::config::Config;
use guide2govern::embedding::EmbeddingProvider;
use guide2govern::index::{MemoryIndex, VectorIndex};
use guide2govern::library::DocumentLibrary;
use guide2govern::llm::ChatModel;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

pub const REL_IMAGE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
pub const REL_LINK: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink";

pub const HR_LINK: &str = "https://hr.example.com/exceptions";

// ─── Documents ──────────────────────────────────────────────────────

/// One paragraph of a fixture document.
#[derive(Default, Clone)]
pub struct Para {
    pub text: String,
    pub images: usize,
    pub link: Option<String>,
}

impl Para {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self) -> Self {
        self.images += 1;
        self
    }

    pub fn with_link(mut self, url: &str) -> Self {
        self.link = Some(url.to_string());
        self
    }
}

pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(3, 2, image::Rgba([20, 120, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Builds a `.docx` archive whose body holds `paras` in order.
pub fn build_docx(paras: &[Para]) -> Vec<u8> {
    let mut body = String::new();
    let mut rels = String::new();
    let mut media = Vec::new();
    let mut next_rel = 1;

    for para in paras {
        body.push_str("<w:p>");
        if !para.text.is_empty() {
            body.push_str(&format!(
                "<w:r><w:t xml:space=\"preserve\">{}</w:t></w:r>",
                para.text
            ));
        }
        for _ in 0..para.images {
            let id = format!("rId{}", next_rel);
            next_rel += 1;
            let target = format!("media/image{}.png", media.len() + 1);
            rels.push_str(&format!(
                "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\"/>",
                id, REL_IMAGE, target
            ));
            media.push(format!("word/{}", target));
            body.push_str(&format!(
                "<w:r><w:drawing><wp:inline><a:graphic><a:graphicData><pic:pic><pic:blipFill>\
                 <a:blip r:embed=\"{}\"/></pic:blipFill></pic:pic></a:graphicData></a:graphic>\
                 </wp:inline></w:drawing></w:r>",
                id
            ));
        }
        if let Some(url) = &para.link {
            let id = format!("rId{}", next_rel);
            next_rel += 1;
            rels.push_str(&format!(
                "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\" TargetMode=\"External\"/>",
                id, REL_LINK, url
            ));
            body.push_str(&format!(
                "<w:hyperlink r:id=\"{}\"><w:r><w:t xml:space=\"preserve\"> (link)</w:t></w:r></w:hyperlink>",
                id
            ));
        }
        body.push_str("</w:p>");
    }

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        let opts = zip::write::SimpleFileOptions::default();
        zip.start_file("word/document.xml", opts).unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document \
             xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\" \
             xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\" \
             xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\">\
             <w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();

        zip.start_file("word/_rels/document.xml.rels", opts).unwrap();
        let rels_xml = format!(
            "<?xml version=\"1.0\"?><Relationships \
             xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">{}</Relationships>",
            rels
        );
        zip.write_all(rels_xml.as_bytes()).unwrap();

        let png = png_bytes();
        for name in &media {
            zip.start_file(name.as_str(), opts).unwrap();
            zip.write_all(&png).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

/// The two-paragraph leave-policy document.
pub fn policy_docx() -> Vec<u8> {
    build_docx(&[
        Para::text("Leave policy applies to all employees.").with_image(),
        Para::text("Contact HR for exceptions.").with_link(HR_LINK),
    ])
}

// ─── Configuration ──────────────────────────────────────────────────

/// A configuration rooted in `root` with `documents/` and `uploads/`.
pub fn test_config(root: &Path) -> Config {
    let docs = root.join("documents");
    let uploads = root.join("uploads");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::create_dir_all(&uploads).unwrap();
    let toml_src = format!(
        r#"[db]
path = "{root}/data/g2g.sqlite"

[documents]
folder = "{docs}"
upload_dir = "{uploads}"

[chunking]
chunk_size = 200
chunk_overlap = 40
min_paragraph_chars = 10

[feedback]
path = "{root}/data/feedback.json"
"#,
        root = root.display(),
        docs = docs.display(),
        uploads = uploads.display(),
    );
    toml::from_str(&toml_src).unwrap()
}

// ─── Fakes ──────────────────────────────────────────────────────────

/// Bag-of-words hashing embedder: texts sharing words point the same way.
pub struct HashEmbedder;

pub const HASH_DIMS: usize = 64;

fn word_slot(word: &str) -> usize {
    word.bytes()
        .fold(5381usize, |h, b| h.wrapping_mul(33) ^ b as usize)
        % HASH_DIMS
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-test"
    }

    fn dims(&self) -> usize {
        HASH_DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; HASH_DIMS];
                for word in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| w.len() > 2)
                {
                    v[word_slot(&word.to_lowercase())] += 1.0;
                }
                if v.iter().all(|x| *x == 0.0) {
                    v[0] = 1.0;
                }
                v
            })
            .collect())
    }
}

/// Repeats the leave-policy sentence when it is in the prompt's context,
/// and returns a numbered list for suggestion prompts.
pub struct EchoChat;

pub const NO_CONTEXT_REPLY: &str = "I could not find this in the documents.";

#[async_trait]
impl ChatModel for EchoChat {
    fn model_name(&self) -> &str {
        "echo-test"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        if prompt.starts_with("Suggest") {
            return Ok("1. Who approves leave?\n2. How many days of leave are granted?\n3. Can leave be carried over?\n4. Extra?".to_string());
        }
        if prompt.contains("Leave policy applies") {
            Ok("Leave policy applies to all employees.".to_string())
        } else {
            Ok(NO_CONTEXT_REPLY.to_string())
        }
    }
}

/// An assistant over an in-memory index with the fakes above.
pub fn test_assistant(config: &Config) -> Arc<Assistant> {
    let library = Arc::new(DocumentLibrary::new(&config.documents).unwrap());
    let index: Arc<dyn VectorIndex> = Arc::new(MemoryIndex::new());
    Arc::new(Assistant::new(
        config,
        library,
        index,
        Arc::new(HashEmbedder),
        Arc::new(EchoChat),
    ))
}
