//! Application wiring and the user-action controller.
//!
//! [`App`] owns every long-lived component (client, catalog store,
//! orchestrator, viewer, exporter) and is created once at startup. User
//! interactions arrive as [`UiAction`]s and produce a [`UiOutcome`] for the
//! front end (terminal or HTTP) to display.

use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::catalog::{CatalogStore, ALL_CATEGORIES};
use crate::client::{HttpClient, RemoteService};
use crate::config::Config;
use crate::error::{ResearchError, Result};
use crate::models::{GenerationRequest, JobId, ParamAxis, ResearchParams};
use crate::orchestrator::Orchestrator;
use crate::pdf::{export_to_pdf, LopdfExporter, PdfExporter, PdfFile};
use crate::progress::ProgressReporter;
use crate::render::{
    render_list, CommonMarkRenderer, Dismiss, ListView, MarkdownRenderer, OpenDocument, Rect,
    Viewer,
};

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this document?";
pub const VIEW_FAILED: &str = "Failed to load document. Please try again.";
pub const DOWNLOAD_FAILED: &str = "Failed to download document. Please try again.";
pub const DELETE_FAILED: &str = "Failed to delete document. Please try again.";
pub const SUBMIT_FAILED: &str = "Failed to start research generation. Please try again.";

/// Modal bounds used for click-outside dismissal.
pub const VIEWER_BOUNDS: Rect = Rect {
    left: 40.0,
    top: 40.0,
    right: 940.0,
    bottom: 760.0,
};

/// Asks the user to confirm a destructive action.
pub trait Confirmer: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// A confirmation that was already given (or refused) up front, such as a
/// `--yes` flag or a `confirm=true` query parameter.
pub struct Preconfirmed(pub bool);

impl Confirmer for Preconfirmed {
    fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}

/// Prompts on stderr and reads `y`/`yes` from stdin.
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, prompt: &str) -> bool {
        eprint!("{} [y/N] ", prompt);
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

/// Generation form state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormState {
    pub area: Option<String>,
    /// Topics offered for the selected area.
    pub topics: Vec<String>,
    pub topic: Option<String>,
    pub params: ResearchParams,
}

impl FormState {
    pub fn create_enabled(&self) -> bool {
        self.area.is_some() && self.topic.is_some()
    }

    /// `Focused • Detailed • Investment`
    pub fn summary(&self) -> String {
        self.params.summary()
    }

    /// Clear the area and topic. Segment selections are kept.
    pub fn reset(&mut self) {
        self.area = None;
        self.topic = None;
        self.topics.clear();
    }

    pub fn request(&self) -> Option<GenerationRequest> {
        Some(GenerationRequest {
            area: self.area.clone()?,
            topic: self.topic.clone()?,
            params: self.params,
        })
    }
}

/// List filters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filters {
    pub category: String,
    pub search: String,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            category: ALL_CATEGORIES.to_string(),
            search: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum UiAction {
    SelectArea(String),
    SelectTopic(String),
    /// Click on a segmented-control option.
    ChooseSegment { axis: ParamAxis, value: String },
    /// ArrowLeft / ArrowRight on a segmented control.
    NudgeSegment { axis: ParamAxis, forward: bool },
    SetSearch(String),
    SetCategory(String),
    Create,
    CancelJob,
    Refresh,
    View(String),
    CloseViewer(Dismiss),
    Download(String),
    Delete(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UiOutcome {
    Form { form: FormState, summary: String, create_enabled: bool },
    Listed { list: ListView },
    Viewer { document: OpenDocument },
    ViewerClosed,
    Exported {
        filename: String,
        #[serde(skip)]
        file: PdfFile,
    },
    Alert { message: String },
    JobStarted { job_id: JobId },
    JobCancelled,
    Nothing,
}

impl UiOutcome {
    fn alert(message: impl Into<String>) -> Self {
        UiOutcome::Alert {
            message: message.into(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Every long-lived component, created once.
pub struct App {
    pub config: Arc<Config>,
    pub client: Arc<dyn RemoteService>,
    pub catalog: Arc<CatalogStore>,
    pub orchestrator: Orchestrator,
    renderer: Arc<dyn MarkdownRenderer>,
    exporter: Arc<dyn PdfExporter>,
    confirmer: Arc<dyn Confirmer>,
    form: Arc<Mutex<FormState>>,
    filters: Mutex<Filters>,
    viewer: Mutex<Viewer>,
}

impl App {
    /// Wire the components around `client`.
    pub fn new(
        config: Arc<Config>,
        client: Arc<dyn RemoteService>,
        reporter: Arc<dyn ProgressReporter>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        let catalog = Arc::new(CatalogStore::new(client.clone(), config.clone()));
        let orchestrator =
            Orchestrator::new(client.clone(), catalog.clone(), config.clone(), reporter);
        let renderer: Arc<dyn MarkdownRenderer> = Arc::new(CommonMarkRenderer);

        let form = Arc::new(Mutex::new(FormState::default()));
        let hook_form = form.clone();
        orchestrator.set_reset_hook(Arc::new(move || lock(&hook_form).reset()));

        Self {
            config,
            client,
            catalog,
            orchestrator,
            renderer: renderer.clone(),
            exporter: Arc::new(LopdfExporter),
            confirmer,
            form,
            filters: Mutex::new(Filters::default()),
            viewer: Mutex::new(Viewer::new(renderer, VIEWER_BOUNDS)),
        }
    }

    /// Wire the components around the HTTP client for `config.api`.
    pub fn connect(
        config: Config,
        reporter: Arc<dyn ProgressReporter>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Result<Self> {
        let client: Arc<dyn RemoteService> = Arc::new(HttpClient::new(&config.api)?);
        Ok(Self::new(Arc::new(config), client, reporter, confirmer))
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn PdfExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    /// Initial catalog load.
    pub async fn start(&self) {
        self.catalog.refresh().await;
    }

    pub fn form(&self) -> FormState {
        lock(&self.form).clone()
    }

    pub fn filters(&self) -> Filters {
        lock(&self.filters).clone()
    }

    pub fn viewer(&self) -> Option<OpenDocument> {
        lock(&self.viewer).current().cloned()
    }

    /// The current catalog filtered by the given category and search.
    pub fn list(&self, category: &str, search: &str) -> ListView {
        let catalog = self.catalog.snapshot();
        render_list(&catalog.filter(category, search))
    }

    /// The current catalog filtered by the stored filters.
    pub fn list_view(&self) -> ListView {
        let filters = self.filters();
        self.list(&filters.category, &filters.search)
    }

    fn form_outcome(&self) -> UiOutcome {
        let form = self.form();
        UiOutcome::Form {
            summary: form.summary(),
            create_enabled: form.create_enabled(),
            form,
        }
    }

    fn listed(&self) -> UiOutcome {
        UiOutcome::Listed {
            list: self.list_view(),
        }
    }

    pub async fn handle(&self, action: UiAction) -> UiOutcome {
        match action {
            UiAction::SelectArea(area) => self.select_area(&area),
            UiAction::SelectTopic(topic) => self.select_topic(&topic),
            UiAction::ChooseSegment { axis, value } => {
                let chosen = lock(&self.form).params.set(axis, &value);
                match chosen {
                    Ok(()) => self.form_outcome(),
                    Err(e) => UiOutcome::alert(e.to_string()),
                }
            }
            UiAction::NudgeSegment { axis, forward } => {
                lock(&self.form).params.nudge(axis, forward);
                self.form_outcome()
            }
            UiAction::SetSearch(search) => {
                lock(&self.filters).search = search;
                self.listed()
            }
            UiAction::SetCategory(category) => {
                lock(&self.filters).category = category;
                self.listed()
            }
            UiAction::Create => self.create().await,
            UiAction::CancelJob => {
                if self.orchestrator.cancel() {
                    UiOutcome::JobCancelled
                } else {
                    UiOutcome::Nothing
                }
            }
            UiAction::Refresh => {
                self.catalog.refresh().await;
                self.listed()
            }
            UiAction::View(id) => match self.view_document(&id).await {
                Ok(Some(document)) => UiOutcome::Viewer { document },
                Ok(None) => UiOutcome::Nothing,
                Err(_) => UiOutcome::alert(VIEW_FAILED),
            },
            UiAction::CloseViewer(reason) => {
                if lock(&self.viewer).dismiss(reason) {
                    UiOutcome::ViewerClosed
                } else {
                    UiOutcome::Nothing
                }
            }
            UiAction::Download(id) => match self.download_document(&id).await {
                Ok(Some(file)) => UiOutcome::Exported {
                    filename: file.filename.clone(),
                    file,
                },
                Ok(None) => UiOutcome::Nothing,
                Err(_) => UiOutcome::alert(DOWNLOAD_FAILED),
            },
            UiAction::Delete(id) => {
                let confirmer = self.confirmer.clone();
                match self.delete_document(&id, confirmer.as_ref()).await {
                    Ok(true) => self.listed(),
                    Ok(false) => UiOutcome::Nothing,
                    Err(_) => UiOutcome::alert(DELETE_FAILED),
                }
            }
        }
    }

    fn select_area(&self, area: &str) -> UiOutcome {
        let area = area.trim();
        {
            let mut form = lock(&self.form);
            form.topic = None;
            if area.is_empty() {
                form.area = None;
                form.topics.clear();
            } else if self.config.areas().any(|a| a == area) {
                form.area = Some(area.to_string());
                form.topics = self.config.topics_for(area).to_vec();
            } else {
                return UiOutcome::alert(format!("Unknown research area '{}'", area));
            }
        }
        self.form_outcome()
    }

    fn select_topic(&self, topic: &str) -> UiOutcome {
        let topic = topic.trim();
        {
            let mut form = lock(&self.form);
            if topic.is_empty() {
                form.topic = None;
            } else if form.topics.iter().any(|t| t == topic) {
                form.topic = Some(topic.to_string());
            } else {
                warn!(%topic, area = ?form.area, "topic not offered for area");
                return UiOutcome::alert(format!("Unknown topic '{}'", topic));
            }
        }
        self.form_outcome()
    }

    async fn create(&self) -> UiOutcome {
        let Some(request) = self.form().request() else {
            // Create stays disabled until both selections are made.
            return UiOutcome::Nothing;
        };
        match self.orchestrator.submit(request).await {
            Ok(job_id) => UiOutcome::JobStarted { job_id },
            Err(ResearchError::Validation(message)) => UiOutcome::alert(message),
            Err(e) => {
                error!(error = %e, "failed to start research");
                UiOutcome::alert(SUBMIT_FAILED)
            }
        }
    }

    /// Fetch a document's markdown. `Ok(None)` when the id is not in the
    /// current catalog.
    pub async fn document_content(&self, id: &str) -> Result<Option<(String, String)>> {
        let catalog = self.catalog.snapshot();
        let Some(doc) = catalog.find(id) else {
            return Ok(None);
        };
        let source = doc.content_source.as_deref().ok_or_else(|| {
            ResearchError::Validation(format!("document {} has no content", id))
        })?;
        let content = self.client.fetch_document_content(source).await?;
        Ok(Some((doc.title.clone(), content)))
    }

    /// Open a document in the viewer.
    pub async fn view_document(&self, id: &str) -> Result<Option<OpenDocument>> {
        match self.document_content(id).await {
            Ok(Some((title, content))) => {
                let mut viewer = lock(&self.viewer);
                Ok(Some(viewer.open(&content, &title).clone()))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                error!(error = %e, %id, "failed to view document");
                Err(e)
            }
        }
    }

    /// Render a document to PDF.
    pub async fn download_document(&self, id: &str) -> Result<Option<PdfFile>> {
        let result = match self.document_content(id).await {
            Ok(Some((title, content))) => export_to_pdf(
                self.renderer.as_ref(),
                self.exporter.as_ref(),
                &content,
                &title,
            )
            .map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            error!(error = %e, %id, "failed to download document");
        }
        result
    }

    /// Delete a document after confirmation, then refresh the catalog.
    /// Returns `Ok(false)` when the user declined.
    pub async fn delete_document(&self, id: &str, confirmer: &dyn Confirmer) -> Result<bool> {
        if !confirmer.confirm(DELETE_PROMPT) {
            return Ok(false);
        }
        if let Err(e) = self.client.delete_object(id).await {
            error!(error = %e, %id, "failed to delete document");
            return Err(e);
        }
        info!(%id, "document deleted");
        self.catalog.refresh().await;
        Ok(true)
    }
}
