//! End-to-end tests of ingestion, retrieval and evidence reconciliation
//! through the public library API.

mod common;

use common::*;
use guide2govern::db;
use guide2govern::evidence;
use guide2govern::index::{SqliteIndex, VectorIndex};
use guide2govern::library::DocumentLibrary;
use guide2govern::migrate;
use guide2govern::models::{ImageId, RetrievedChunk};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn hit(source: &str, para_index: usize) -> RetrievedChunk {
    RetrievedChunk {
        source: source.to_string(),
        para_index,
        chunk_index: 0,
        text: String::new(),
        score: 1.0,
    }
}

// ─── Ingestion ──────────────────────────────────────────────────────

#[tokio::test]
async fn reingesting_unchanged_folder_adds_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    fs::write(config.documents.folder.join("doc.docx"), policy_docx()).unwrap();
    let assistant = test_assistant(&config);

    let first = assistant.ingest(false).await.unwrap();
    assert_eq!(first.scanned, 1);
    assert_eq!(first.ingested, 1);
    let chunks = assistant.index().chunk_count().await.unwrap();
    assert!(chunks >= 2);

    let second = assistant.ingest(false).await.unwrap();
    assert_eq!(second.ingested, 0);
    assert_eq!(second.unchanged, 1);
    assert_eq!(assistant.index().chunk_count().await.unwrap(), chunks);

    // A forced run rewrites the same chunks instead of duplicating them.
    let full = assistant.ingest(true).await.unwrap();
    assert_eq!(full.ingested, 1);
    assert_eq!(assistant.index().chunk_count().await.unwrap(), chunks);
}

#[tokio::test]
async fn changed_document_is_replaced_and_removed_document_pruned() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let folder = config.documents.folder.clone();
    fs::write(folder.join("doc.docx"), policy_docx()).unwrap();
    fs::write(
        folder.join("travel.docx"),
        build_docx(&[Para::text("Travel must be booked through the portal.")]),
    )
    .unwrap();
    let assistant = test_assistant(&config);
    assistant.ingest(false).await.unwrap();

    fs::write(
        folder.join("doc.docx"),
        build_docx(&[
            Para::text("Leave policy was revised for contractors this year."),
            Para::text("Parental leave is now sixteen weeks long."),
            Para::text("Sick leave requires a certificate after three days."),
        ]),
    )
    .unwrap();
    fs::remove_file(folder.join("travel.docx")).unwrap();

    let report = assistant.reload().await.unwrap();
    assert_eq!(report.ingested, 1);
    assert_eq!(report.pruned, 1);

    let sources = assistant.index().indexed_sources().await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name, "doc.docx");
    assert_eq!(sources[0].paragraphs, 3);

    let hits = assistant.retrieve("parental leave weeks", 3).await.unwrap();
    assert!(hits.iter().all(|h| h.source == "doc.docx"));
    assert!(hits.iter().all(|h| !h.text.contains("all employees")));
    assert!(hits.iter().any(|h| h.text.contains("sixteen weeks")));
}

#[tokio::test]
async fn broken_document_is_reported_and_others_still_ingest() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    fs::write(config.documents.folder.join("doc.docx"), policy_docx()).unwrap();
    fs::write(config.documents.folder.join("broken.docx"), b"not a zip").unwrap();
    let assistant = test_assistant(&config);

    let report = assistant.ingest(false).await.unwrap();
    assert_eq!(report.ingested, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "broken.docx");
}

#[tokio::test]
async fn document_that_stops_parsing_loses_its_chunks() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let path = config.documents.folder.join("doc.docx");
    fs::write(&path, policy_docx()).unwrap();
    let assistant = test_assistant(&config);
    assistant.ingest(false).await.unwrap();
    assert!(assistant.index().chunk_count().await.unwrap() > 0);

    fs::write(&path, b"not a zip any more").unwrap();
    let report = assistant.reload().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "doc.docx");
    assert_eq!(assistant.index().chunk_count().await.unwrap(), 0);
    assert!(assistant.index().indexed_sources().await.unwrap().is_empty());

    let answer = assistant.answer("What is the leave policy?").await.unwrap();
    assert_eq!(answer.answer, NO_CONTEXT_REPLY);
    assert!(answer.image_ids.is_empty());
}

#[tokio::test]
async fn sqlite_index_survives_reconnect() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    fs::write(config.documents.folder.join("doc.docx"), policy_docx()).unwrap();

    let build = |pool: sqlx::SqlitePool| {
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteIndex::new(pool, "hash-test", HASH_DIMS));
        Arc::new(guide2govern::assistant::Assistant::new(
            &config,
            Arc::new(DocumentLibrary::new(&config.documents).unwrap()),
            index,
            Arc::new(HashEmbedder),
            Arc::new(EchoChat),
        ))
    };

    let pool = db::connect(&config).await.unwrap();
    migrate::migrate(&pool).await.unwrap();
    let first = build(pool.clone());
    assert_eq!(first.ingest(false).await.unwrap().ingested, 1);
    pool.close().await;

    let pool = db::connect(&config).await.unwrap();
    migrate::migrate(&pool).await.unwrap();
    let second = build(pool);
    let report = second.ingest(false).await.unwrap();
    assert_eq!(report.ingested, 0);
    assert_eq!(report.unchanged, 1);
    let hits = second.retrieve("leave policy", 3).await.unwrap();
    assert_eq!(hits[0].source, "doc.docx");
    assert_eq!(hits[0].para_index, 0);
}

// ─── Evidence ───────────────────────────────────────────────────────

#[test]
fn evidence_window_is_three_paragraphs_each_side() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let paras: Vec<Para> = (0..20)
        .map(|i| {
            Para::text(&format!("Paragraph number {}", i))
                .with_image()
                .with_link(&format!("https://example.com/p{}", i))
        })
        .collect();
    fs::write(config.documents.folder.join("long.docx"), build_docx(&paras)).unwrap();
    let library = DocumentLibrary::new(&config.documents).unwrap();

    let evidence = evidence::reconcile(&library, &[hit("long.docx", 10)], 3);

    let expected_ids: Vec<ImageId> = (7..=13).map(|p| ImageId::new("long.docx", p, 0)).collect();
    assert_eq!(evidence.image_ids, expected_ids);
    let expected_links: Vec<String> = (7..=13).map(|p| format!("https://example.com/p{}", p)).collect();
    assert_eq!(evidence.links, expected_links);
    for id in &evidence.image_ids {
        let text = id.to_string();
        assert!(text.starts_with("long.docx::img"));
        assert_eq!(text.parse::<ImageId>().unwrap(), *id);
    }
}

#[test]
fn evidence_window_clips_at_document_bounds_and_dedupes() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let paras: Vec<Para> = (0..5)
        .map(|i| Para::text(&format!("Paragraph number {}", i)).with_image())
        .collect();
    fs::write(config.documents.folder.join("short.docx"), build_docx(&paras)).unwrap();
    let library = DocumentLibrary::new(&config.documents).unwrap();

    let evidence = evidence::reconcile(
        &library,
        &[hit("short.docx", 0), hit("short.docx", 4), hit("missing.docx", 2)],
        3,
    );
    let paras: Vec<usize> = evidence.image_ids.iter().map(|id| id.para_index).collect();
    assert_eq!(paras, vec![0, 1, 2, 3, 4]);
}

// ─── Question answering ─────────────────────────────────────────────

#[tokio::test]
async fn answer_carries_image_and_link_of_supporting_paragraphs() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    fs::write(config.documents.folder.join("doc.docx"), policy_docx()).unwrap();
    let assistant = test_assistant(&config);
    assistant.ingest(false).await.unwrap();

    let answer = assistant.answer("What is the leave policy?").await.unwrap();
    assert_eq!(answer.answer, "Leave policy applies to all employees.");
    assert_eq!(answer.image_ids, vec!["doc.docx::img0_0".to_string()]);
    assert_eq!(answer.related_links, vec![HR_LINK.to_string()]);

    let image = assistant
        .image("doc.docx::img0_0".parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(image.content_type, "image/png");
    assert!(image::load_from_memory(&image.bytes).is_ok());
}

#[tokio::test]
async fn answer_without_documents_has_no_evidence() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let assistant = test_assistant(&config);
    assistant.ingest(false).await.unwrap();

    let answer = assistant.answer("What is the leave policy?").await.unwrap();
    assert_eq!(answer.answer, NO_CONTEXT_REPLY);
    assert!(answer.image_ids.is_empty());
    assert!(answer.related_links.is_empty());
}

#[tokio::test]
async fn suggestions_fall_back_without_hits_and_cap_at_three() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let assistant = test_assistant(&config);

    let defaults = assistant.suggest("leave").await.unwrap();
    assert_eq!(defaults.len(), 3);
    assert_eq!(defaults[0], "What is this document about?");

    fs::write(config.documents.folder.join("doc.docx"), policy_docx()).unwrap();
    assistant.ingest(false).await.unwrap();
    let suggestions = assistant.suggest("leave").await.unwrap();
    assert_eq!(
        suggestions,
        vec![
            "Who approves leave?",
            "How many days of leave are granted?",
            "Can leave be carried over?",
        ]
    );
}
