//! Fake remote object store / execution API, served by axum on a loopback
//! port from its own thread so both sync and async tests can use it.

#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub const API_KEY: &str = "test-key";

#[derive(Default)]
pub struct RemoteState {
    pub base_url: String,
    pub objects: Vec<Value>,
    pub contents: HashMap<String, String>,
    pub executed: Vec<Value>,
    pub deleted: Vec<String>,
    /// Whether each content fetch carried an Authorization header.
    pub fetch_had_auth: Vec<bool>,
}

type Shared = Arc<Mutex<RemoteState>>;

pub struct FakeRemote {
    pub base_url: String,
    state: Shared,
}

impl FakeRemote {
    pub fn start() -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let state: Shared = Arc::new(Mutex::new(RemoteState {
            base_url: base_url.clone(),
            ..RemoteState::default()
        }));
        let app = router(state.clone());

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });

        Self { base_url, state }
    }

    /// Base URL to put in `[api].base_url`.
    pub fn api_url(&self) -> String {
        format!("{}/api/v1", self.base_url)
    }

    pub fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }

    /// Store a research object whose content source serves `markdown`.
    pub fn add_document(&self, id: &str, name: &str, created_at: &str, markdown: &str) {
        let source = format!("store/{}.md", id);
        let mut state = self.state();
        state.contents.insert(source.clone(), markdown.to_string());
        state.objects.push(json!({
            "id": id,
            "name": name,
            "created_at": created_at,
            "content": { "source": source, "type": "text/markdown" },
        }));
    }
}

fn router(state: Shared) -> Router {
    let api = Router::new()
        .route("/objects", get(list_objects).post(create_object))
        .route("/objects/download-url", post(download_url))
        .route("/objects/{id}", get(get_object).delete(delete_object))
        .route("/execute/async", post(execute))
        .route("/jobs/{id}", get(job_status));

    Router::new()
        .nest("/api/v1", api)
        .route("/files/{*source}", get(fetch_file))
        .with_state(state)
}

fn authorized(headers: &HeaderMap) -> Result<(), StatusCode> {
    let expected = format!("Bearer {}", API_KEY);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

#[derive(Deserialize)]
struct Page {
    limit: usize,
    offset: usize,
}

async fn list_objects(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Value>>, StatusCode> {
    authorized(&headers)?;
    let state = state.lock().unwrap();
    Ok(Json(
        state
            .objects
            .iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect(),
    ))
}

async fn get_object(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&headers)?;
    let state = state.lock().unwrap();
    state
        .objects
        .iter()
        .find(|o| o["id"] == id.as_str())
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn create_object(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&headers)?;
    let mut state = state.lock().unwrap();
    let id = format!("new-{}", state.objects.len() + 1);
    body["id"] = json!(id);
    state.objects.push(body.clone());
    Ok(Json(body))
}

async fn delete_object(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> StatusCode {
    if let Err(status) = authorized(&headers) {
        return status;
    }
    let mut state = state.lock().unwrap();
    let before = state.objects.len();
    state.objects.retain(|o| o["id"] != id.as_str());
    if state.objects.len() == before {
        return StatusCode::NOT_FOUND;
    }
    state.deleted.push(id);
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct DownloadRequest {
    file: String,
    format: String,
}

async fn download_url(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<DownloadRequest>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&headers)?;
    if body.format != "original" {
        return Err(StatusCode::BAD_REQUEST);
    }
    let state = state.lock().unwrap();
    if !state.contents.contains_key(&body.file) {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(json!({
        "url": format!("{}/files/{}", state.base_url, body.file),
    })))
}

async fn fetch_file(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(source): Path<String>,
) -> Result<String, StatusCode> {
    let mut state = state.lock().unwrap();
    state
        .fetch_had_auth
        .push(headers.contains_key("authorization"));
    state
        .contents
        .get(&source)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

async fn execute(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    authorized(&headers)?;
    state.lock().unwrap().executed.push(body);
    Ok(Json(json!({ "id": 7, "status": "queued" })))
}

async fn job_status(headers: HeaderMap, Path(_id): Path<String>) -> Result<Json<Value>, StatusCode> {
    authorized(&headers)?;
    Ok(Json(json!({ "status": "running" })))
}
