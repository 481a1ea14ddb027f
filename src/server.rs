//! JSON HTTP API for the chat front-end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/test` | Liveness greeting |
//! | `GET`  | `/health` | Status and version |
//! | `POST` | `/chat` | Grounded answer with image ids and links |
//! | `POST` | `/signin` | Register a user |
//! | `POST` | `/save_message` | Persist one chat message |
//! | `POST` | `/get_session` | Messages of one session |
//! | `GET`  | `/get_history` | A user's sessions, latest first |
//! | `GET`  | `/image` | Image bytes by image id |
//! | `GET`  | `/links` | Links of one paragraph |
//! | `POST` | `/upload` | Store a `.docx` or image file |
//! | `POST` | `/feedback` | Append to the feedback log |
//! | `GET`  | `/suggest` | Follow-up question suggestions |
//! | `POST` | `/api/login` | Validate an identity-provider token |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `internal` (500). Internal errors carry a generic message; the cause is
//! logged.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::assistant::Assistant;
use crate::auth::{bearer_token, AuthError, Identity, TokenVerifier};
use crate::config::Config;
use crate::docx;
use crate::evidence::image_content_type;
use crate::feedback::{FeedbackEntry, FeedbackLog};
use crate::library::sanitize_file_name;
use crate::models::{Answer, HistoryEntry, ImageId, Message};
use crate::store::{normalize_timestamp, ChatStore, NewMessage, SqliteChatStore};
use crate::{db, migrate};

const WELCOME: &str = "Welcome to Guide 2 Govern Application";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<Assistant>,
    pub store: Arc<dyn ChatStore>,
    pub feedback: Arc<FeedbackLog>,
    /// `None` when login is not configured.
    pub verifier: Option<Arc<TokenVerifier>>,
}

/// Builds the router with CORS, request tracing and the upload size limit.
///
/// An empty `cors_origins` list allows any origin.
pub fn router(state: AppState, cors_origins: &[String], max_upload_bytes: usize) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    }
    .allow_methods(Any)
    .allow_headers(Any);

    Router::new()
        .route("/test", get(handle_test))
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .route("/signin", post(handle_signin))
        .route("/save_message", post(handle_save_message))
        .route("/get_session", post(handle_get_session))
        .route("/get_history", get(handle_get_history))
        .route("/image", get(handle_image))
        .route("/links", get(handle_links))
        .route("/upload", post(handle_upload))
        .route("/feedback", post(handle_feedback))
        .route("/suggest", get(handle_suggest))
        .route("/api/login", post(handle_login))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Opens the database, brings the index up to date and serves until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;

    let assistant = Arc::new(Assistant::from_config(config, pool.clone())?);
    match assistant.ingest(false).await {
        Ok(report) => tracing::info!(
            scanned = report.scanned,
            ingested = report.ingested,
            unchanged = report.unchanged,
            pruned = report.pruned,
            failed = report.failed.len(),
            "startup ingestion complete"
        ),
        // Serve stored vectors even when the embedding service is down.
        Err(e) => tracing::error!(error = %format!("{:#}", e), "startup ingestion failed"),
    }

    let state = AppState {
        assistant,
        store: Arc::new(SqliteChatStore::new(pool)),
        feedback: Arc::new(FeedbackLog::new(config.feedback.path.clone())),
        verifier: TokenVerifier::from_config(&config.auth)?.map(Arc::new),
    };
    if state.verifier.is_none() {
        tracing::info!("auth not configured; /api/login will reject all requests");
    }

    let app = router(state, &config.server.cors_origins, config.server.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %config.server.bind, "listening");
    println!("Guide2Govern listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn unauthorized(err: AuthError) -> AppError {
    tracing::info!(error = %err, "login rejected");
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: err.to_string(),
    }
}

/// Logs the cause and hides it from the client.
fn internal(context: &str, err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "{}", context);
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: context.to_string(),
    }
}

fn require(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(bad_request(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ============ GET /test, GET /health ============

async fn handle_test() -> Json<&'static str> {
    Json(WELCOME)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    username: Option<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Answer>, AppError> {
    require(&req.question, "question")?;
    tracing::info!(user = req.username.as_deref().unwrap_or("-"), "chat request");
    let answer = state
        .assistant
        .answer(req.question.trim())
        .await
        .map_err(|e| internal("failed to answer question", e))?;
    Ok(Json(answer))
}

// ============ Users and messages ============

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Deserialize)]
struct SignInRequest {
    email: String,
    username: String,
}

async fn handle_signin(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    require(&req.email, "email")?;
    state
        .store
        .upsert_user(req.email.trim(), req.username.trim())
        .await
        .map_err(|e| internal("failed to register user", e))?;
    Ok(Json(StatusResponse { status: "success" }))
}

async fn handle_save_message(
    State(state): State<AppState>,
    Json(req): Json<NewMessage>,
) -> Result<Json<StatusResponse>, AppError> {
    require(&req.session_id, "session_id")?;
    require(&req.email, "email")?;
    normalize_timestamp(&req.created_at).map_err(|e| bad_request(e.to_string()))?;
    state
        .store
        .insert_message(&req)
        .await
        .map_err(|e| internal("failed to save message", e))?;
    Ok(Json(StatusResponse { status: "saved" }))
}

#[derive(Deserialize)]
struct SessionRequest {
    session_id: String,
    email: String,
}

#[derive(Serialize)]
struct SessionResponse {
    messages: Vec<Message>,
    session_id: String,
}

async fn handle_get_session(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let messages = state
        .store
        .fetch_session(&req.session_id, &req.email)
        .await
        .map_err(|e| internal("failed to load session", e))?;
    Ok(Json(SessionResponse {
        messages,
        session_id: req.session_id,
    }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    email: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<HistoryEntry>,
}

async fn handle_get_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let history = state
        .store
        .fetch_history(&q.email, q.limit)
        .await
        .map_err(|e| internal("failed to load history", e))?;
    Ok(Json(HistoryResponse { history }))
}

// ============ Evidence ============

#[derive(Deserialize)]
struct ImageQuery {
    image_id: String,
}

async fn handle_image(
    State(state): State<AppState>,
    Query(q): Query<ImageQuery>,
) -> Result<Response, AppError> {
    let id = q
        .image_id
        .parse::<ImageId>()
        .map_err(|e| bad_request(e.to_string()))?;
    let payload = state
        .assistant
        .image(id)
        .await
        .map_err(|e| internal("failed to load image", e))?
        .ok_or_else(|| not_found("Image not found"))?;
    Ok(([(header::CONTENT_TYPE, payload.content_type)], payload.bytes).into_response())
}

#[derive(Deserialize)]
struct LinksQuery {
    file: String,
    idx: usize,
}

#[derive(Serialize)]
struct LinksResponse {
    links: Vec<String>,
}

async fn handle_links(
    State(state): State<AppState>,
    Query(q): Query<LinksQuery>,
) -> Result<Json<LinksResponse>, AppError> {
    let links = state
        .assistant
        .links(&q.file, q.idx)
        .await
        .map_err(|e| internal("failed to load links", e))?
        .ok_or_else(|| not_found("File not found or index out of bounds"))?;
    Ok(Json(LinksResponse { links }))
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    filename: String,
    message: String,
    image_ids: Vec<String>,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
        upload = Some((name, bytes));
        break;
    }
    let (raw_name, bytes) = upload.ok_or_else(|| bad_request("missing multipart field: file"))?;
    let filename = sanitize_file_name(&raw_name)
        .ok_or_else(|| bad_request("invalid file name"))?
        .to_string();

    let is_docx = docx::is_docx(std::path::Path::new(&filename));
    if !is_docx && image_content_type(&filename).is_none() {
        return Err(bad_request("Unsupported file type"));
    }

    let image_ids = if is_docx {
        let data = bytes.clone();
        let parsed = tokio::task::spawn_blocking(move || docx::parse_bytes(&data))
            .await
            .map_err(|e| internal("failed to parse upload", e.into()))?
            .map_err(|e| bad_request(format!("invalid docx: {}", e)))?;
        parsed
            .paragraphs
            .iter()
            .enumerate()
            .flat_map(|(p, para)| {
                let filename = filename.clone();
                (0..para.images.len()).map(move |o| ImageId::new(filename.clone(), p, o).to_string())
            })
            .collect()
    } else {
        vec![ImageId::new(filename.clone(), 0, 0).to_string()]
    };

    let upload_dir = state.assistant.library().upload_dir().to_path_buf();
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .map_err(|e| internal("failed to store upload", e.into()))?;
    let dest = upload_dir.join(&filename);
    tokio::fs::write(&dest, &bytes)
        .await
        .map_err(|e| internal("failed to store upload", e.into()))?;
    tracing::info!(file = %filename, bytes = bytes.len(), "stored upload");

    if is_docx {
        if let Err(e) = state.assistant.reload().await {
            tracing::error!(error = %format!("{:#}", e), "reload after upload failed");
        }
    }

    Ok(Json(UploadResponse {
        filename,
        message: "File uploaded successfully".to_string(),
        image_ids,
    }))
}

// ============ POST /feedback ============

#[derive(Deserialize)]
struct FeedbackRequest {
    question: String,
    response: String,
    feedback: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct FeedbackResponse {
    status: &'static str,
    message: &'static str,
}

async fn handle_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, AppError> {
    let entry = FeedbackEntry {
        question: req.question,
        response: req.response,
        feedback: req.feedback,
        session_id: req
            .session_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        timestamp: req
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
    };
    state
        .feedback
        .append(entry)
        .await
        .map_err(|e| internal("failed to record feedback", e))?;
    Ok(Json(FeedbackResponse {
        status: "success",
        message: "Feedback recorded",
    }))
}

// ============ GET /suggest ============

#[derive(Deserialize)]
struct SuggestQuery {
    q: String,
}

async fn handle_suggest(
    State(state): State<AppState>,
    Query(query): Query<SuggestQuery>,
) -> Result<Json<Vec<String>>, AppError> {
    let q = query.q.trim();
    if q.chars().count() < 2 {
        return Err(bad_request("q must be at least 2 characters"));
    }
    let suggestions = state
        .assistant
        .suggest(q)
        .await
        .map_err(|e| internal("Failed to generate suggestions", e))?;
    Ok(Json(suggestions))
}

// ============ POST /api/login ============

#[derive(Serialize)]
struct LoginResponse {
    status: &'static str,
    user: Identity,
}

async fn handle_login(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LoginResponse>, AppError> {
    let verifier = state
        .verifier
        .as_ref()
        .ok_or_else(|| unauthorized(AuthError::Disabled))?;
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = bearer_token(header).map_err(unauthorized)?;
    let user = verifier.verify(token).await.map_err(unauthorized)?;

    state
        .store
        .upsert_user(&user.email, &user.name)
        .await
        .map_err(|e| internal("failed to register user", e))?;

    Ok(Json(LoginResponse {
        status: "success",
        user,
    }))
}
