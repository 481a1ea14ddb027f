//! Implementations of the `g2g` subcommands that print to stdout.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::assistant::Assistant;
use crate::config::Config;
use crate::models::ImageId;
use crate::{db, docx, migrate};

async fn open_assistant(config: &Config) -> Result<Arc<Assistant>> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    Ok(Arc::new(Assistant::from_config(config, pool)?))
}

pub async fn run_ingest(config: &Config, full: bool) -> Result<()> {
    let assistant = open_assistant(config).await?;
    let report = assistant.ingest(full).await?;
    report.print(full);
    Ok(())
}

/// Answers one question and prints the answer followed by its evidence.
pub async fn run_ask(config: &Config, question: &str, show_context: bool) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let assistant = open_assistant(config).await?;

    if show_context {
        let hits = assistant.retrieve(question, config.retrieval.k).await?;
        println!("context:");
        for hit in &hits {
            println!(
                "  [{:.3}] {} ¶{} #{}",
                hit.score, hit.source, hit.para_index, hit.chunk_index
            );
            println!("         {}", hit.text.replace('\n', " "));
        }
        println!();
    }

    let answer = assistant.answer(question).await?;
    println!("{}", answer.answer.trim());
    if !answer.image_ids.is_empty() {
        println!();
        println!("images:");
        for id in &answer.image_ids {
            println!("  {}", id);
        }
    }
    if !answer.related_links.is_empty() {
        println!();
        println!("links:");
        for link in &answer.related_links {
            println!("  {}", link);
        }
    }
    Ok(())
}

/// Prints the paragraph sequence of one document with its evidence.
pub fn run_parse(path: &Path) -> Result<()> {
    let document =
        docx::parse_file(path).with_context(|| format!("parsing {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    println!("{}", path.display());
    println!("  paragraphs: {}", document.len());
    println!("  images: {}", document.image_count());
    for (i, paragraph) in document.paragraphs.iter().enumerate() {
        if paragraph.text.is_empty() && paragraph.images.is_empty() && paragraph.links.is_empty() {
            continue;
        }
        let preview: String = paragraph.text.chars().take(80).collect();
        println!("  [{}] {}", i, preview.replace('\n', " "));
        for offset in 0..paragraph.images.len() {
            println!("      image {}", ImageId::new(name.clone(), i, offset));
        }
        for link in &paragraph.links {
            println!("      link  {}", link);
        }
    }
    Ok(())
}

/// Lists indexed documents.
pub async fn run_sources(config: &Config) -> Result<()> {
    let assistant = open_assistant(config).await?;
    let sources = assistant.index().indexed_sources().await?;
    if sources.is_empty() {
        println!("No documents indexed. Run `g2g ingest`.");
        return Ok(());
    }
    println!("{:<40} {:>10} {:>8}", "DOCUMENT", "PARAGRAPHS", "CHUNKS");
    for source in &sources {
        println!(
            "{:<40} {:>10} {:>8}",
            source.name, source.paragraphs, source.chunks
        );
    }
    println!("{} documents, {} chunks", sources.len(), assistant.index().chunk_count().await?);
    Ok(())
}
