//! HTTP API tests: the real router over an in-memory remote service.

use serde_json::{json, Value};
use std::sync::Arc;

use deep_research::client::RemoteService;
use deep_research::config::Config;
use deep_research::controller::{App, Preconfirmed};
use deep_research::memory::{InMemoryService, Op};
use deep_research::models::{ObjectContent, RawObject};
use deep_research::progress::LatestProgress;
use deep_research::server::{router, AppState};

fn object(id: &str, name: &str, created_at: &str, area: Option<&str>) -> RawObject {
    let properties = area.map(|a| {
        let mut map = serde_json::Map::new();
        map.insert("research_area".into(), json!(a));
        map
    });
    RawObject {
        id: Some(id.into()),
        name: Some(name.into()),
        created_at: Some(created_at.into()),
        properties,
        content: Some(ObjectContent {
            source: Some(format!("files/{}.md", id)),
            ..ObjectContent::default()
        }),
    }
}

struct TestServer {
    base: String,
    http: reqwest::Client,
    service: Arc<InMemoryService>,
}

impl TestServer {
    async fn start(service: InMemoryService) -> Self {
        let service = Arc::new(service);
        let client: Arc<dyn RemoteService> = service.clone();
        let progress = Arc::new(LatestProgress::new());
        let app = App::new(
            Arc::new(Config::minimal()),
            client,
            progress.clone(),
            Arc::new(Preconfirmed(false)),
        );
        app.start().await;

        let router = router(AppState {
            app: Arc::new(app),
            progress,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            http: reqwest::Client::new(),
            service,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_json(&self, path: &str) -> (u16, Value) {
        let resp = self.http.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

fn library() -> InMemoryService {
    let service = InMemoryService::new();
    service.insert(
        object("gdp", "DeepResearch_GDP Outlook", "2025-03-04T10:00:00Z", None),
        Some("# GDP Outlook\n\nGrowth is **steady**.\n\n- one\n- two"),
    );
    service.insert(
        object("nvda", "DeepResearch_NVDA Deep Dive", "2025-03-06T10:00:00Z", Some("Assets")),
        Some("# NVDA\n\n| Metric | Value |\n|---|---|\n| P/E | 40 |"),
    );
    service.insert(
        object("old", "DeepResearch_Tax Strategy", "2024-01-01T00:00:00Z", None),
        None,
    );
    service
}

#[tokio::test]
async fn health_reports_version() {
    let server = TestServer::start(InMemoryService::new()).await;
    let (status, body) = server.get_json("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn topics_lists_taxonomy_and_defaults() {
    let server = TestServer::start(InMemoryService::new()).await;
    let (status, body) = server.get_json("/api/topics").await;
    assert_eq!(status, 200);
    let areas: Vec<&str> = body["taxonomy"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["area"].as_str().unwrap())
        .collect();
    assert_eq!(areas, vec!["Markets", "Sectors", "Assets", "Concepts"]);
    assert!(body["defaults"].is_object());
}

#[tokio::test]
async fn documents_are_newest_first_and_filterable() {
    let server = TestServer::start(library()).await;

    let (_, all) = server.get_json("/api/documents").await;
    assert_eq!(all["count"], 3);
    let ids: Vec<&str> = all["documents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["nvda", "gdp", "old"]);

    let (_, markets) = server.get_json("/api/documents?category=Markets").await;
    assert_eq!(markets["count"], 1);
    assert_eq!(markets["documents"][0]["topic"], "GDP");

    let (_, searched) = server.get_json("/api/documents?q=nvda").await;
    assert_eq!(searched["count"], 1);
    assert_eq!(searched["documents"][0]["area"], "Assets");

    let (_, none) = server.get_json("/api/documents?category=Sectors").await;
    assert_eq!(none["count"], 0);
}

#[tokio::test]
async fn index_page_shows_rows_and_chips() {
    let server = TestServer::start(library()).await;
    let html = server
        .http
        .get(server.url("/?category=Markets"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(html.contains("data-doc-id=\"gdp\""));
    assert!(!html.contains("data-doc-id=\"nvda\""));
    assert!(html.contains("chip active"));
}

#[tokio::test]
async fn view_renders_markdown_page() {
    let server = TestServer::start(library()).await;
    let resp = server
        .http
        .get(server.url("/api/documents/gdp/view"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let html = resp.text().await.unwrap();
    assert!(html.contains("<strong>steady</strong>"));
    assert!(html.contains("<li>one</li>"));
}

#[tokio::test]
async fn view_of_unknown_id_is_not_found() {
    let server = TestServer::start(library()).await;
    let (status, body) = server.get_json("/api/documents/missing/view").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn view_with_missing_content_shows_alert() {
    let server = TestServer::start(library()).await;
    let (status, body) = server.get_json("/api/documents/old/view").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["message"], "Failed to load document. Please try again.");
}

#[tokio::test]
async fn pdf_download_is_attachment_named_after_title() {
    let server = TestServer::start(library()).await;
    let resp = server
        .http
        .get(server.url("/api/documents/nvda/pdf"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "application/pdf"
    );
    assert_eq!(
        resp.headers()["content-disposition"].to_str().unwrap(),
        "attachment; filename=\"NVDA_Deep_Dive.pdf\""
    );
    let bytes = resp.bytes().await.unwrap();
    assert!(bytes.starts_with(b"%PDF-"));
}

#[tokio::test]
async fn delete_requires_confirmation() {
    let server = TestServer::start(library()).await;

    let resp = server
        .http
        .delete(server.url("/api/documents/gdp"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(server.service.calls(Op::Delete), 0);

    let resp = server
        .http
        .delete(server.url("/api/documents/gdp?confirm=true"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["deleted"], "gdp");
    assert_eq!(body["count"], 2);
    assert_eq!(server.service.object_count(), 2);
}

#[tokio::test]
async fn generate_then_conflict_then_cancel() {
    let server = TestServer::start(library()).await;
    let body = json!({ "area": "Markets", "topic": "GDP", "depth": "Comprehensive" });

    let resp = server
        .http
        .post(server.url("/api/generate"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 202);
    let started: Value = resp.json().await.unwrap();
    assert_eq!(started["job_id"], "job-1");
    assert_eq!(started["snapshot"]["state"], "waiting");
    assert_eq!(
        server.service.submitted_tasks(),
        vec!["GDP: Depth - Comprehensive, Rigor - Detailed Analysis, Focus - Investment Research"]
    );

    let resp = server
        .http
        .post(server.url("/api/generate"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 409);
    let conflict: Value = resp.json().await.unwrap();
    assert_eq!(conflict["error"]["code"], "job_active");

    let (_, job) = server.get_json("/api/job").await;
    assert_eq!(job["state"], "waiting");
    assert_eq!(job["last_event"]["event"], "countdown");

    let resp = server
        .http
        .post(server.url("/api/cancel"))
        .send()
        .await
        .unwrap();
    let cancelled: Value = resp.json().await.unwrap();
    assert_eq!(cancelled["cancelled"], true);

    let (_, job) = server.get_json("/api/job").await;
    assert_eq!(job["state"], "idle");
    assert_eq!(job["last_outcome"], "cancelled");
}

#[tokio::test]
async fn generate_rejects_unknown_area_and_bad_labels() {
    let server = TestServer::start(InMemoryService::new()).await;

    let resp = server
        .http
        .post(server.url("/api/generate"))
        .json(&json!({ "area": "Weather", "topic": "Rain" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let resp = server
        .http
        .post(server.url("/api/generate"))
        .json(&json!({ "area": "Markets", "topic": "GDP", "rigor": "Sloppy" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    assert_eq!(server.service.calls(Op::Execute), 0);
}
