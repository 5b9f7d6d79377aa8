//! HTTP front end.
//!
//! Serves the document library and generation controls over a small JSON
//! API plus an HTML index page.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | HTML page with the filtered document list |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/topics` | Research areas and their topics |
//! | `GET`  | `/api/documents?category=&q=` | Filtered document list |
//! | `POST` | `/api/refresh` | Reload the catalog, then list |
//! | `GET`  | `/api/documents/{id}/view` | Rendered document page |
//! | `GET`  | `/api/documents/{id}/pdf` | Document as PDF |
//! | `DELETE` | `/api/documents/{id}?confirm=true` | Delete a document |
//! | `POST` | `/api/generate` | Start a generation job |
//! | `POST` | `/api/cancel` | Stop tracking the active job |
//! | `GET`  | `/api/job` | Job slot state and latest progress |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "select both an area and a topic" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `job_active` (409),
//! `timeout` (408), `upstream_error` (502), `export_error` (500),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::catalog::ALL_CATEGORIES;
use crate::config::{AreaTopics, Config};
use crate::controller::{
    App, Preconfirmed, DELETE_FAILED, DOWNLOAD_FAILED, SUBMIT_FAILED, VIEW_FAILED,
};
use crate::error::ResearchError;
use crate::models::{Document, GenerationRequest, JobId, ResearchParams};
use crate::orchestrator::JobSnapshot;
use crate::progress::{describe, LatestProgress, ProgressEvent};
use crate::render::{escape_html, viewer_page};

/// Shared state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub app: Arc<App>,
    pub progress: Arc<LatestProgress>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let progress = Arc::new(LatestProgress::new());
    let app = App::connect(config, progress.clone(), Arc::new(Preconfirmed(false)))?;
    app.start().await;

    let router = router(AppState {
        app: Arc::new(app),
        progress,
    });

    info!(addr = %bind_addr, "research server listening");
    eprintln!("Research server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// All routes, with CORS open.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/api/topics", get(handle_topics))
        .route("/api/documents", get(handle_documents))
        .route("/api/refresh", post(handle_refresh))
        .route("/api/documents/{id}/view", get(handle_view))
        .route("/api/documents/{id}/pdf", get(handle_pdf))
        .route("/api/documents/{id}", delete(handle_delete))
        .route("/api/generate", post(handle_generate))
        .route("/api/cancel", post(handle_cancel))
        .route("/api/job", get(handle_job))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

/// Maps library errors onto the error contract. `alert` replaces the
/// message for upstream failures, which are logged in full already.
fn classify(err: ResearchError, alert: &str) -> AppError {
    match err {
        ResearchError::Validation(message) if message.contains("already in progress") => {
            AppError::new(StatusCode::CONFLICT, "job_active", message)
        }
        ResearchError::Validation(message) => bad_request(message),
        ResearchError::Api { status: 404, .. } => not_found(alert),
        ResearchError::Transport(_)
        | ResearchError::Api { .. }
        | ResearchError::Decode(_)
        | ResearchError::Transform(_) => {
            AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", alert)
        }
        timeout @ ResearchError::JobTimeout { .. } => {
            AppError::new(StatusCode::REQUEST_TIMEOUT, "timeout", timeout.to_string())
        }
        ResearchError::Render(_) | ResearchError::Export(_) => {
            AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "export_error", alert)
        }
        other => AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            other.to_string(),
        ),
    }
}

// ============ GET /health ============

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

// ============ GET /api/topics ============

#[derive(Serialize)]
struct TopicsResponse {
    taxonomy: Vec<AreaTopics>,
    defaults: ResearchParams,
}

async fn handle_topics(State(state): State<AppState>) -> Json<TopicsResponse> {
    Json(TopicsResponse {
        taxonomy: state.app.config.taxonomy.clone(),
        defaults: ResearchParams::default(),
    })
}

// ============ Document list ============

#[derive(Deserialize, Default)]
struct ListQuery {
    category: Option<String>,
    q: Option<String>,
}

impl ListQuery {
    fn category(&self) -> &str {
        match self.category.as_deref() {
            Some(c) if !c.is_empty() => c,
            _ => ALL_CATEGORIES,
        }
    }

    fn search(&self) -> &str {
        self.q.as_deref().unwrap_or("")
    }
}

#[derive(Serialize)]
struct DocumentsResponse {
    count: usize,
    documents: Vec<Document>,
}

fn documents(state: &AppState, query: &ListQuery) -> DocumentsResponse {
    let catalog = state.app.catalog.snapshot();
    let documents: Vec<Document> = catalog
        .filter(query.category(), query.search())
        .into_iter()
        .cloned()
        .collect();
    DocumentsResponse {
        count: documents.len(),
        documents,
    }
}

async fn handle_documents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<DocumentsResponse> {
    Json(documents(&state, &query))
}

async fn handle_refresh(State(state): State<AppState>) -> Json<DocumentsResponse> {
    state.app.catalog.refresh().await;
    Json(documents(&state, &ListQuery::default()))
}

const INDEX_SCRIPT: &str = r#"<script>
document.addEventListener('click', async (e) => {
  const btn = e.target.closest('.doc-action');
  if (!btn) return;
  const id = btn.closest('[data-doc-id]').dataset.docId;
  const base = '/api/documents/' + encodeURIComponent(id);
  if (btn.classList.contains('view-action')) { location.href = base + '/view'; }
  if (btn.classList.contains('download-action')) { location.href = base + '/pdf'; }
  if (btn.classList.contains('delete-action')) {
    if (!confirm('Are you sure you want to delete this document?')) return;
    const res = await fetch(base + '?confirm=true', { method: 'DELETE' });
    if (!res.ok) { alert('Failed to delete document. Please try again.'); return; }
    location.reload();
  }
});
</script>"#;

async fn handle_index(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Html<String> {
    let app = &state.app;
    let category = query.category();
    let list = app.list(category, query.search());

    let chips: String = std::iter::once(ALL_CATEGORIES)
        .chain(app.config.areas())
        .map(|area| {
            let class = if area == category { "chip active" } else { "chip" };
            format!(
                "<a class=\"{}\" href=\"/?category={}\">{}</a>",
                class,
                escape_html(area),
                escape_html(area)
            )
        })
        .collect();

    let job = state
        .progress
        .last()
        .map(|e| format!("<div class=\"toast\">{}</div>", escape_html(&describe(&e))))
        .unwrap_or_default();

    Html(format!(
        concat!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Deep Research</title></head><body>",
            "<form method=\"get\" action=\"/\"><input type=\"hidden\" name=\"category\" value=\"{category}\">",
            "<input id=\"searchInput\" name=\"q\" value=\"{search}\" placeholder=\"Search documents\"></form>",
            "<nav class=\"chips\">{chips}</nav>{job}<main id=\"docsPane\">{list}</main>{script}</body></html>"
        ),
        category = escape_html(category),
        search = escape_html(query.search()),
        chips = chips,
        job = job,
        list = list.to_html(),
        script = INDEX_SCRIPT,
    ))
}

// ============ Single documents ============

async fn handle_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>, AppError> {
    let document = state
        .app
        .view_document(&id)
        .await
        .map_err(|e| classify(e, VIEW_FAILED))?
        .ok_or_else(|| not_found(format!("no document with id: {}", id)))?;
    Ok(Html(viewer_page(&document)))
}

async fn handle_pdf(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let file = state
        .app
        .download_document(&id)
        .await
        .map_err(|e| classify(e, DOWNLOAD_FAILED))?
        .ok_or_else(|| not_found(format!("no document with id: {}", id)))?;

    let disposition = format!("attachment; filename=\"{}\"", file.filename);
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    )
        .into_response())
}

#[derive(Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    confirm: bool,
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: String,
    count: usize,
    documents: Vec<Document>,
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    if !query.confirm {
        return Err(bad_request("deleting a document requires confirm=true"));
    }
    state
        .app
        .delete_document(&id, &Preconfirmed(true))
        .await
        .map_err(|e| classify(e, DELETE_FAILED))?;

    let listed = documents(&state, &ListQuery::default());
    Ok(Json(DeleteResponse {
        deleted: id,
        count: listed.count,
        documents: listed.documents,
    }))
}

// ============ Generation ============

#[derive(Deserialize)]
struct GenerateBody {
    area: String,
    topic: String,
    depth: Option<String>,
    rigor: Option<String>,
    focus: Option<String>,
}

impl GenerateBody {
    fn into_request(self) -> Result<GenerationRequest, ResearchError> {
        let mut params = ResearchParams::default();
        if let Some(depth) = &self.depth {
            params.depth = depth.parse()?;
        }
        if let Some(rigor) = &self.rigor {
            params.rigor = rigor.parse()?;
        }
        if let Some(focus) = &self.focus {
            params.focus = focus.parse()?;
        }
        Ok(GenerationRequest {
            area: self.area,
            topic: self.topic,
            params,
        })
    }
}

#[derive(Serialize)]
struct GenerateResponse {
    job_id: JobId,
    snapshot: JobSnapshot,
}

async fn handle_generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<(StatusCode, Json<GenerateResponse>), AppError> {
    let request = body.into_request().map_err(|e| classify(e, ""))?;
    if !state.app.config.areas().any(|a| a == request.area) {
        return Err(bad_request(format!("unknown research area: {}", request.area)));
    }

    let job_id = state
        .app
        .orchestrator
        .submit(request)
        .await
        .map_err(|e| classify(e, SUBMIT_FAILED))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            job_id,
            snapshot: state.app.orchestrator.snapshot(),
        }),
    ))
}

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn handle_cancel(State(state): State<AppState>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.app.orchestrator.cancel(),
    })
}

#[derive(Serialize)]
struct JobResponse {
    #[serde(flatten)]
    snapshot: JobSnapshot,
    last_event: Option<ProgressEvent>,
    message: Option<String>,
}

async fn handle_job(State(state): State<AppState>) -> Json<JobResponse> {
    let last_event = state.progress.last();
    Json(JobResponse {
        snapshot: state.app.orchestrator.snapshot(),
        message: last_event.as_ref().map(describe),
        last_event,
    })
}
