//! HTTP API tests against a live server on a free local port.

mod common;

use common::*;
use guide2govern::auth::TokenVerifier;
use guide2govern::feedback::FeedbackLog;
use guide2govern::server::{router, AppState};
use guide2govern::store::SqliteChatStore;
use guide2govern::{db, migrate};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

const SECRET: &[u8] = b"guide2govern-test-secret";
const SECRET_B64: &str = "Z3VpZGUyZ292ZXJuLXRlc3Qtc2VjcmV0";
const ISSUER: &str = "https://login.example.com";
const AUDIENCE: &str = "g2g";

struct TestServer {
    base: String,
    client: reqwest::Client,
    _tmp: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

async fn start_server(with_login: bool) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    std::fs::write(config.documents.folder.join("doc.docx"), policy_docx()).unwrap();

    let assistant = test_assistant(&config);
    assistant.ingest(false).await.unwrap();

    let pool = db::connect(&config).await.unwrap();
    migrate::migrate(&pool).await.unwrap();

    let verifier = with_login.then(|| {
        let keys: JwkSet = serde_json::from_value(json!({
            "keys": [{"kty": "oct", "kid": "k1", "alg": "HS256", "k": SECRET_B64}]
        }))
        .unwrap();
        Arc::new(TokenVerifier::with_keys(ISSUER, AUDIENCE, keys))
    });

    let state = AppState {
        assistant,
        store: Arc::new(SqliteChatStore::new(pool)),
        feedback: Arc::new(FeedbackLog::new(config.feedback.path.clone())),
        verifier,
    };
    let app = router(state, &[], 5 * 1024 * 1024);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        _tmp: tmp,
    }
}

// ─── Basics ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_and_health_endpoints() {
    let server = start_server(false).await;

    let resp = server.client.get(server.url("/test")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!("Welcome to Guide 2 Govern Application"));

    let body: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

// ─── Chat and evidence ──────────────────────────────────────────────

#[tokio::test]
async fn chat_returns_answer_with_evidence() {
    let server = start_server(false).await;

    let resp = server
        .client
        .post(server.url("/chat"))
        .json(&json!({"question": "What is the leave policy?", "username": "ana"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["answer"], "Leave policy applies to all employees.");
    assert_eq!(body["image_ids"], json!(["doc.docx::img0_0"]));
    assert_eq!(body["related_links"], json!([HR_LINK]));
}

#[tokio::test]
async fn chat_rejects_empty_question() {
    let server = start_server(false).await;
    let resp = server
        .client
        .post(server.url("/chat"))
        .json(&json!({"question": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn image_lookup_statuses() {
    let server = start_server(false).await;
    let get = |id: &str| {
        server
            .client
            .get(server.url("/image"))
            .query(&[("image_id", id)])
            .send()
    };

    let resp = get("doc.docx::img0_0").await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "image/png");
    let bytes = resp.bytes().await.unwrap();
    assert!(image::load_from_memory(&bytes).is_ok());

    assert_eq!(get("doc.docx::img99_0").await.unwrap().status(), 404);
    assert_eq!(get("doc.docx::img0_5").await.unwrap().status(), 404);
    assert_eq!(get("nothing.docx::img0_0").await.unwrap().status(), 404);
    assert_eq!(get("doc.docx-img0_0").await.unwrap().status(), 400);
    assert_eq!(get("doc.docx::imgA_0").await.unwrap().status(), 400);
}

#[tokio::test]
async fn links_by_paragraph() {
    let server = start_server(false).await;
    let get = |file: &str, idx: &str| {
        server
            .client
            .get(server.url("/links"))
            .query(&[("file", file), ("idx", idx)])
            .send()
    };

    let body: Value = get("doc.docx", "1").await.unwrap().json().await.unwrap();
    assert_eq!(body["links"], json!([HR_LINK]));
    let body: Value = get("doc.docx", "0").await.unwrap().json().await.unwrap();
    assert_eq!(body["links"], json!([]));

    assert_eq!(get("doc.docx", "9").await.unwrap().status(), 404);
    assert_eq!(get("other.docx", "0").await.unwrap().status(), 404);
}

#[tokio::test]
async fn non_document_files_are_not_found() {
    let server = start_server(false).await;
    std::fs::write(server._tmp.path().join("documents/notes.txt"), "plain notes").unwrap();

    let resp = server
        .client
        .get(server.url("/links"))
        .query(&[("file", "notes.txt"), ("idx", "0")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = server
        .client
        .get(server.url("/image"))
        .query(&[("image_id", "notes.txt::img0_0")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn suggest_requires_two_characters() {
    let server = start_server(false).await;

    let resp = server
        .client
        .get(server.url("/suggest"))
        .query(&[("q", "l")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = server
        .client
        .get(server.url("/suggest"))
        .query(&[("q", "leave")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Vec<String> = resp.json().await.unwrap();
    assert_eq!(body.len(), 3);
}

// ─── Users and history ──────────────────────────────────────────────

#[tokio::test]
async fn messages_sessions_and_history() {
    let server = start_server(false).await;
    let email = "ana@example.com";

    let resp = server
        .client
        .post(server.url("/signin"))
        .json(&json!({"email": email, "username": "Ana"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");

    let messages = [
        ("s1", "user", "What is the leave policy?", "2025-01-01T10:00:00Z"),
        ("s1", "bot", "Leave policy applies to all employees.", "2025-01-01T10:00:05Z"),
        ("s2", "user", "How do I book travel?", "2025-01-02T09:00:00Z"),
    ];
    for (session, sender, text, at) in messages {
        let resp = server
            .client
            .post(server.url("/save_message"))
            .json(&json!({
                "session_id": session,
                "email": email,
                "sender": sender,
                "text": text,
                "created_at": at,
                "image_ids": if sender == "bot" { json!(["doc.docx::img0_0"]) } else { json!([]) },
                "related_links": []
            }))
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "saved");
    }

    let body: Value = server
        .client
        .post(server.url("/get_session"))
        .json(&json!({"session_id": "s1", "email": email}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["session_id"], "s1");
    let msgs = body["messages"].as_array().unwrap();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0]["sender"], "user");
    assert_eq!(msgs[1]["image_ids"], json!(["doc.docx::img0_0"]));

    let body: Value = server
        .client
        .get(server.url("/get_history"))
        .query(&[("email", email)])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        body["history"],
        json!([
            {"session_id": "s2", "first_message": "How do I book travel?"},
            {"session_id": "s1", "first_message": "What is the leave policy?"}
        ])
    );

    let body: Value = server
        .client
        .get(server.url("/get_history"))
        .query(&[("email", email), ("limit", "1")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["history"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn save_message_rejects_bad_timestamp() {
    let server = start_server(false).await;
    let resp = server
        .client
        .post(server.url("/save_message"))
        .json(&json!({
            "session_id": "s1",
            "email": "ana@example.com",
            "sender": "user",
            "text": "hi",
            "created_at": "yesterday"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn feedback_is_recorded() {
    let server = start_server(false).await;
    let resp = server
        .client
        .post(server.url("/feedback"))
        .json(&json!({
            "question": "What is the leave policy?",
            "response": "Leave policy applies to all employees.",
            "feedback": "helpful"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
}

// ─── Uploads ────────────────────────────────────────────────────────

async fn upload(server: &TestServer, name: &str, bytes: Vec<u8>) -> reqwest::Response {
    let part = reqwest::multipart::Part::bytes(bytes).file_name(name.to_string());
    let form = reqwest::multipart::Form::new().part("file", part);
    server
        .client
        .post(server.url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn uploaded_docx_is_indexed_and_answerable() {
    let server = start_server(false).await;
    let docx = build_docx(&[
        Para::text("Remote work requires manager approval.").with_image(),
        Para::text("Equipment is provided by IT.").with_image(),
    ]);

    let resp = upload(&server, "remote.docx", docx).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["filename"], "remote.docx");
    assert_eq!(
        body["image_ids"],
        json!(["remote.docx::img0_0", "remote.docx::img1_0"])
    );

    let resp = server
        .client
        .get(server.url("/image"))
        .query(&[("image_id", "remote.docx::img1_0")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = server
        .client
        .post(server.url("/chat"))
        .json(&json!({"question": "Does remote work require approval?"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = body["image_ids"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(ids.contains(&"remote.docx::img0_0"));
}

#[tokio::test]
async fn uploaded_image_is_served_raw() {
    let server = start_server(false).await;
    let png = png_bytes();

    let body: Value = upload(&server, "chart.png", png.clone()).await.json().await.unwrap();
    assert_eq!(body["image_ids"], json!(["chart.png::img0_0"]));

    let resp = server
        .client
        .get(server.url("/image"))
        .query(&[("image_id", "chart.png::img0_0")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "image/png");
    assert_eq!(resp.bytes().await.unwrap().to_vec(), png);
}

#[tokio::test]
async fn upload_rejects_unsupported_and_invalid_files() {
    let server = start_server(false).await;

    let resp = upload(&server, "notes.txt", b"hello".to_vec()).await;
    assert_eq!(resp.status(), 400);

    let resp = upload(&server, "broken.docx", b"not a zip".to_vec()).await;
    assert_eq!(resp.status(), 400);

    let resp = upload(&server, "../escape.docx", policy_docx()).await;
    assert_ne!(resp.status(), 500);
}

// ─── Login ──────────────────────────────────────────────────────────

fn signed_token(claims: Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("k1".to_string());
    encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

#[tokio::test]
async fn login_without_configuration_is_unauthorized() {
    let server = start_server(false).await;
    let resp = server
        .client
        .post(server.url("/api/login"))
        .bearer_auth("anything")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn login_with_valid_token_returns_user() {
    let server = start_server(true).await;
    let token = signed_token(json!({
        "iss": ISSUER,
        "aud": AUDIENCE,
        "exp": chrono::Utc::now().timestamp() + 600,
        "email": "ana@example.com",
        "name": "Ana Lima",
        "sub": "abc"
    }));

    let resp = server
        .client
        .post(server.url("/api/login"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["user"]["email"], "ana@example.com");
    assert_eq!(body["user"]["name"], "Ana Lima");

    let resp = server
        .client
        .post(server.url("/api/login"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = server
        .client
        .post(server.url("/api/login"))
        .bearer_auth(signed_token(json!({
            "iss": "https://evil.example.com",
            "aud": AUDIENCE,
            "exp": chrono::Utc::now().timestamp() + 600,
            "email": "ana@example.com"
        })))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}
