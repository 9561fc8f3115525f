//! HTTP JSON API.
//!
//! Exposes the job contract as RPC-style endpoints so an editor or desktop
//! shell can drive the pipeline without linking the library.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/artifacts` | Which artifacts exist for a project |
//! | `POST` | `/analyze` | Regenerate project intelligence |
//! | `POST` | `/vectorize` | Rebuild the embedding index |
//! | `POST` | `/reload` | Analyze then vectorize |
//! | `POST` | `/chat` | Answer a question about a project |
//! | `POST` | `/search` | Vector search over a project |
//! | `POST` | `/file-chunks` | Every indexed chunk of one file |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "validation", "message": "validation failed: query is empty" } }
//! ```
//!
//! Codes are those of [`KnowledgeError::code`]. `/analyze`, `/reload` and
//! `/chat` always answer 200 with their own `success`/stage fields, since
//! a failed job is a normal result for them.
//!
//! # Credentials
//!
//! Requests may carry `openai_api_key` / `anthropic_api_key`; absent keys
//! fall back to the ones the server was started with.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::KnowledgeError;
use crate::jobs::KnowledgeService;
use crate::models::{
    AnalyzeReport, ArtifactStatus, ChatRequest, ChatResponse, Chunk, Credentials, ReloadReport,
    ScoredChunk, VectorizeReport,
};
use crate::router::SearchFilter;

#[derive(Clone)]
pub struct AppState {
    service: KnowledgeService,
    content_root: Arc<PathBuf>,
    credentials: Arc<Credentials>,
}

impl AppState {
    pub fn new(service: KnowledgeService, content_root: PathBuf, credentials: Credentials) -> Self {
        Self {
            service,
            content_root: Arc::new(content_root),
            credentials: Arc::new(credentials),
        }
    }

    fn content_root(&self, requested: Option<&str>) -> PathBuf {
        requested
            .map(PathBuf::from)
            .unwrap_or_else(|| self.content_root.as_ref().clone())
    }

    fn credentials(&self, keys: &ApiKeys) -> Credentials {
        Credentials::new(
            keys.openai_api_key
                .clone()
                .or_else(|| self.credentials.openai_api_key.clone()),
            keys.anthropic_api_key
                .clone()
                .or_else(|| self.credentials.anthropic_api_key.clone()),
        )
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/artifacts", post(handle_artifacts))
        .route("/analyze", post(handle_analyze))
        .route("/vectorize", post(handle_vectorize))
        .route("/reload", post(handle_reload))
        .route("/chat", post(handle_chat))
        .route("/search", post(handle_search))
        .route("/file-chunks", post(handle_file_chunks))
        .layer(cors)
        .with_state(state)
}

/// Bind `[server].bind` and serve until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.service.config().server.bind.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "knowledge server listening");
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
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<KnowledgeError> for AppError {
    fn from(err: KnowledgeError) -> Self {
        let status = match &err {
            KnowledgeError::Validation(_) => StatusCode::BAD_REQUEST,
            KnowledgeError::MissingArtifacts(_) => StatusCode::PRECONDITION_FAILED,
            KnowledgeError::ExternalService { .. } | KnowledgeError::MalformedSummary(_) => {
                StatusCode::BAD_GATEWAY
            }
            KnowledgeError::ArtifactCorruption { .. }
            | KnowledgeError::Config(_)
            | KnowledgeError::Io { .. }
            | KnowledgeError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ Request bodies ============

#[derive(Debug, Default, Deserialize)]
pub struct ApiKeys {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectBody {
    pub project_path: String,
    #[serde(default)]
    pub content_root: Option<String>,
    #[serde(flatten)]
    pub keys: ApiKeys,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    #[serde(flatten)]
    pub request: ChatRequest,
    #[serde(default)]
    pub content_root: Option<String>,
    #[serde(flatten)]
    pub keys: ApiKeys,
}

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub project_path: String,
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Minimum cosine similarity for a hit.
    #[serde(default)]
    pub min_similarity: Option<f32>,
    #[serde(default)]
    pub content_root: Option<String>,
    #[serde(flatten)]
    pub keys: ApiKeys,
}

#[derive(Debug, Deserialize)]
pub struct FileChunksBody {
    pub project_path: String,
    /// Path relative to the project root.
    pub file_path: String,
    #[serde(default)]
    pub content_root: Option<String>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub results: Vec<ScoredChunk>,
}

#[derive(Serialize)]
pub struct FileChunksResponse {
    pub chunks: Vec<Chunk>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

// ============ Handlers ============

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_artifacts(
    State(state): State<AppState>,
    Json(body): Json<ProjectBody>,
) -> Result<Json<ArtifactStatus>, AppError> {
    let content_root = state.content_root(body.content_root.as_deref());
    let status = state
        .service
        .check_artifacts(&content_root, &PathBuf::from(&body.project_path))?;
    Ok(Json(status))
}

async fn handle_analyze(
    State(state): State<AppState>,
    Json(body): Json<ProjectBody>,
) -> Json<AnalyzeReport> {
    let content_root = state.content_root(body.content_root.as_deref());
    let credentials = state.credentials(&body.keys);
    Json(
        state
            .service
            .analyze(PathBuf::from(body.project_path), content_root, credentials)
            .await,
    )
}

async fn handle_vectorize(
    State(state): State<AppState>,
    Json(body): Json<ProjectBody>,
) -> Result<Json<VectorizeReport>, AppError> {
    let content_root = state.content_root(body.content_root.as_deref());
    let credentials = state.credentials(&body.keys);
    let report = state
        .service
        .vectorize(PathBuf::from(body.project_path), content_root, credentials)
        .await?;
    Ok(Json(report))
}

async fn handle_reload(
    State(state): State<AppState>,
    Json(body): Json<ProjectBody>,
) -> Json<ReloadReport> {
    let content_root = state.content_root(body.content_root.as_deref());
    let credentials = state.credentials(&body.keys);
    Json(
        state
            .service
            .reload(PathBuf::from(body.project_path), content_root, credentials)
            .await,
    )
}

async fn handle_chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Json<ChatResponse> {
    let content_root = state.content_root(body.content_root.as_deref());
    let credentials = state.credentials(&body.keys);
    Json(
        state
            .service
            .chat(body.request, content_root, credentials)
            .await,
    )
}

async fn handle_search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, AppError> {
    let content_root = state.content_root(body.content_root.as_deref());
    let credentials = state.credentials(&body.keys);
    let filter = SearchFilter {
        extensions: body.extensions,
        min_similarity: body.min_similarity,
    };
    let results = state
        .service
        .search(
            &content_root,
            &PathBuf::from(&body.project_path),
            &body.query,
            body.k,
            &filter,
            &credentials,
        )
        .await?;
    Ok(Json(SearchResponse { results }))
}

async fn handle_file_chunks(
    State(state): State<AppState>,
    Json(body): Json<FileChunksBody>,
) -> Result<Json<FileChunksResponse>, AppError> {
    let content_root = state.content_root(body.content_root.as_deref());
    let chunks = state
        .service
        .file_chunks(&content_root, &PathBuf::from(&body.project_path), &body.file_path)
        .await?;
    Ok(Json(FileChunksResponse { chunks }))
}
