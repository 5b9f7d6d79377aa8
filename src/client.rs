//! Remote object-store / AI-execution API client.
//!
//! [`RemoteService`] is the seam every other component talks to; [`HttpClient`]
//! implements it over `reqwest`. Each method issues exactly one HTTP request
//! and never retries, leaving retry policy to callers (the orchestrator's
//! poll loop is the only one that has one).
//!
//! # Endpoints
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | `GET` | `/objects?limit=&offset=` | [`list_objects`](RemoteService::list_objects) |
//! | `GET` | `/objects/{id}` | [`get_object`](RemoteService::get_object) |
//! | `POST` | `/objects` | [`create_object`](RemoteService::create_object) |
//! | `DELETE` | `/objects/{id}` | [`delete_object`](RemoteService::delete_object) |
//! | `POST` | `/objects/download-url` | [`request_download_url`](RemoteService::request_download_url) |
//! | `POST` | `/execute/async` | [`execute_async`](RemoteService::execute_async) |
//! | `GET` | `/jobs/{id}` | [`job_status`](RemoteService::job_status) |
//!
//! Download URLs are pre-signed and fetched without the bearer header.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

use crate::config::ApiConfig;
use crate::error::{ResearchError, Result};
use crate::models::{DownloadUrl, JobId, JobStatus, RawObject};

/// Operations offered by the remote service.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn list_objects(&self, limit: u32, offset: u32) -> Result<Vec<RawObject>>;

    async fn get_object(&self, id: &str) -> Result<RawObject>;

    async fn create_object(&self, payload: Value) -> Result<RawObject>;

    async fn delete_object(&self, id: &str) -> Result<()>;

    /// Exchange an opaque content reference for a short-lived URL.
    async fn request_download_url(&self, content_source: &str) -> Result<DownloadUrl>;

    /// Plain unauthenticated GET of a pre-signed URL.
    async fn fetch_content(&self, url: &str) -> Result<String>;

    /// Submit a generation task; the payload carries the fixed
    /// interaction, environment and model identifiers.
    async fn execute_async(&self, task: &str) -> Result<JobId>;

    async fn job_status(&self, job_id: &JobId) -> Result<JobStatus>;

    /// Download-url exchange followed by the content fetch.
    async fn fetch_document_content(&self, content_source: &str) -> Result<String> {
        let download = self.request_download_url(content_source).await?;
        self.fetch_content(&download.url).await
    }

    /// Store markdown as a new research object.
    async fn store_markdown_document(
        &self,
        title: &str,
        content: &str,
        metadata: serde_json::Map<String, Value>,
    ) -> Result<RawObject> {
        self.create_object(markdown_object_payload(title, content, metadata))
            .await
    }
}

/// Body for `POST /objects` holding a markdown document.
pub fn markdown_object_payload(
    title: &str,
    content: &str,
    metadata: serde_json::Map<String, Value>,
) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert("document_type".into(), json!("research"));
    properties.insert("generated_at".into(), json!(Utc::now().to_rfc3339()));
    properties.extend(metadata);

    json!({
        "name": title,
        "description": format!("Research document: {}", title),
        "content": {
            "source": content,
            "type": "text/markdown",
            "name": title,
        },
        "properties": properties,
    })
}

/// Body for `POST /execute/async`.
pub fn execute_payload(api: &ApiConfig, task: &str) -> Value {
    json!({
        "type": "conversation",
        "interaction": api.interaction,
        "data": { "Task": task },
        "config": {
            "environment": api.environment_id,
            "model": api.model,
        },
    })
}

/// Pull the job id out of an execute response (`job_id` or `id`).
pub fn parse_job_id(body: &Value) -> Result<JobId> {
    ["job_id", "id"]
        .iter()
        .filter_map(|key| body.get(*key))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .map(JobId)
        .ok_or_else(|| ResearchError::Decode("execute response carries no job id".to_string()))
}

/// `reqwest`-backed implementation of [`RemoteService`].
pub struct HttpClient {
    http: reqwest::Client,
    api: ApiConfig,
}

impl HttpClient {
    pub fn new(api: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()
            .map_err(|e| ResearchError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api: api.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.api.base_url.trim_end_matches('/'), endpoint)
    }

    fn authed(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(endpoint))
            .header("Authorization", format!("Bearer {}", self.api.api_key))
            .header("Content-Type", "application/json")
    }

    /// Send a request and fail on transport errors or non-2xx statuses.
    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Response> {
        debug!(endpoint, "calling remote service");
        let response = request.send().await.map_err(|e| {
            error!(endpoint, error = %e, "remote call failed");
            ResearchError::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = status.canonical_reason().unwrap_or("").to_string();
            error!(endpoint, status = status.as_u16(), "remote call rejected");
            return Err(ResearchError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn call<T: DeserializeOwned>(&self, endpoint: &str, request: RequestBuilder) -> Result<T> {
        let response = self.send(endpoint, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ResearchError::Decode(format!("{}: {}", endpoint, e)))
    }
}

#[async_trait]
impl RemoteService for HttpClient {
    async fn list_objects(&self, limit: u32, offset: u32) -> Result<Vec<RawObject>> {
        let endpoint = format!("/objects?limit={}&offset={}", limit, offset);
        self.call(&endpoint, self.authed(Method::GET, &endpoint))
            .await
    }

    async fn get_object(&self, id: &str) -> Result<RawObject> {
        let endpoint = format!("/objects/{}", id);
        self.call(&endpoint, self.authed(Method::GET, &endpoint))
            .await
    }

    async fn create_object(&self, payload: Value) -> Result<RawObject> {
        let endpoint = "/objects";
        self.call(endpoint, self.authed(Method::POST, endpoint).json(&payload))
            .await
    }

    async fn delete_object(&self, id: &str) -> Result<()> {
        let endpoint = format!("/objects/{}", id);
        self.send(&endpoint, self.authed(Method::DELETE, &endpoint))
            .await?;
        Ok(())
    }

    async fn request_download_url(&self, content_source: &str) -> Result<DownloadUrl> {
        let endpoint = "/objects/download-url";
        let body = json!({ "file": content_source, "format": "original" });
        self.call(endpoint, self.authed(Method::POST, endpoint).json(&body))
            .await
    }

    async fn fetch_content(&self, url: &str) -> Result<String> {
        let response = self.send(url, self.http.get(url)).await?;
        response
            .text()
            .await
            .map_err(|e| ResearchError::Transport(e.to_string()))
    }

    async fn execute_async(&self, task: &str) -> Result<JobId> {
        let endpoint = "/execute/async";
        let payload = execute_payload(&self.api, task);
        let body: Value = self
            .call(endpoint, self.authed(Method::POST, endpoint).json(&payload))
            .await?;
        parse_job_id(&body)
    }

    async fn job_status(&self, job_id: &JobId) -> Result<JobStatus> {
        let endpoint = format!("/jobs/{}", job_id);
        self.call(&endpoint, self.authed(Method::GET, &endpoint))
            .await
    }
}
