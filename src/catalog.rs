//! Document catalog: derivation, ordering, filtering and refresh.
//!
//! A [`Catalog`] is an immutable snapshot built from one full listing of
//! the remote store. Documents never change in place; [`CatalogStore`]
//! swaps in a whole new snapshot on every refresh and drops results from
//! refreshes that were overtaken by a newer one.
//!
//! # Loading
//!
//! One `GET /objects?limit=<batch_size>&offset=0` call fetches everything;
//! filtering happens client-side. Objects that cannot be transformed are
//! logged and skipped. A failed listing yields an empty catalog.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use crate::client::RemoteService;
use crate::config::{AreaTopics, Config};
use crate::error::{ResearchError, Result};
use crate::models::{Document, RawObject};

/// Category sentinel that disables area filtering.
pub const ALL_CATEGORIES: &str = "All";

/// Placeholder for an area or topic that could not be resolved.
pub const UNKNOWN: &str = "Unknown";

const TITLE_PREFIXES: &[&str] = &[
    "DeepResearch_",
    "Deep Research_",
    "deep research_",
    "DEEP RESEARCH_",
    "DEEP RESEARCH:",
];

/// Human-readable title from a raw object name.
///
/// `DeepResearch_Employment_Markets` → `Employment Markets`.
pub fn derive_title(name: Option<&str>) -> String {
    let name = match name.map(str::trim) {
        Some(n) if !n.is_empty() => n,
        _ => return "Untitled".to_string(),
    };

    let stripped = TITLE_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name);

    let title = stripped.replace(['_', '-'], " ").trim().to_string();
    if title.is_empty() {
        "Untitled".to_string()
    } else {
        title
    }
}

/// Resolve `(area, topic)`: metadata property, then taxonomy substring
/// match against the title, then [`UNKNOWN`].
pub fn resolve_classification(
    title: &str,
    obj: &RawObject,
    taxonomy: &[AreaTopics],
) -> (String, String) {
    let lower = title.to_lowercase();
    let mut area = UNKNOWN.to_string();
    let mut topic = UNKNOWN.to_string();

    if let Some(entry) = taxonomy
        .iter()
        .find(|a| lower.contains(&a.area.to_lowercase()))
    {
        area = entry.area.clone();
    }

    // A topic match also pins its owning area.
    'outer: for entry in taxonomy {
        for name in &entry.topics {
            if lower.contains(&name.to_lowercase()) {
                area = entry.area.clone();
                topic = name.clone();
                break 'outer;
            }
        }
    }

    if let Some(prop) = obj.property("research_area") {
        area = prop.to_string();
    }
    if let Some(prop) = obj.property("research_topic") {
        topic = prop.to_string();
    }

    (area, topic)
}

/// Parse an ISO 8601 timestamp; naive timestamps are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// `Mar 4, 2025`, or `Recent` when the timestamp is unknown.
pub fn format_when(created_at: Option<DateTime<Utc>>) -> String {
    match created_at {
        Some(dt) => dt.format("%b %-d, %Y").to_string(),
        None => "Recent".to_string(),
    }
}

/// Map one raw object to a [`Document`].
pub fn transform_object(obj: &RawObject, taxonomy: &[AreaTopics]) -> Result<Document> {
    let id = obj
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            ResearchError::Transform(format!(
                "object '{}' has no id",
                obj.name.as_deref().unwrap_or("?")
            ))
        })?
        .to_string();

    let title = derive_title(obj.name.as_deref());
    let (area, topic) = resolve_classification(&title, obj, taxonomy);

    let created_at = obj
        .created_at
        .as_deref()
        .or_else(|| obj.property("generated_at"))
        .and_then(parse_timestamp);

    let content_source = obj
        .content
        .as_ref()
        .and_then(|c| c.source.clone())
        .filter(|s| !s.is_empty());

    Ok(Document {
        id,
        title,
        area,
        topic,
        created_at,
        content_source,
        when: format_when(created_at),
    })
}

/// An immutable, ordered, de-duplicated set of documents.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    documents: Vec<Document>,
}

impl Catalog {
    /// Transform, de-duplicate by id and sort newest first.
    ///
    /// Documents without a timestamp sort after every dated one; ties keep
    /// their listing order.
    pub fn from_objects(objects: &[RawObject], taxonomy: &[AreaTopics]) -> Self {
        let mut seen = HashSet::new();
        let mut documents = Vec::with_capacity(objects.len());

        for obj in objects {
            match transform_object(obj, taxonomy) {
                Ok(doc) => {
                    if seen.insert(doc.id.clone()) {
                        documents.push(doc);
                    } else {
                        debug!(id = %doc.id, "dropping duplicate object");
                    }
                }
                Err(e) => warn!(error = %e, "skipping object"),
            }
        }

        documents.sort_by(|a, b| match (a.created_at, b.created_at) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        Self { documents }
    }

    /// Fetch the full listing and build a snapshot.
    pub async fn try_load(client: &dyn RemoteService, config: &Config) -> Result<Self> {
        let objects = client.list_objects(config.documents.batch_size, 0).await?;
        let catalog = Self::from_objects(&objects, &config.taxonomy);
        info!(
            objects = objects.len(),
            documents = catalog.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// Like [`try_load`](Self::try_load) but degrades to an empty catalog.
    pub async fn load(client: &dyn RemoteService, config: &Config) -> Self {
        match Self::try_load(client, config).await {
            Ok(catalog) => catalog,
            Err(e) => {
                error!(error = %e, "failed to load documents");
                Self::default()
            }
        }
    }

    /// Documents whose area equals `category` (or any, for [`ALL_CATEGORIES`])
    /// and whose title, area or topic contains `search`, ignoring case.
    pub fn filter(&self, category: &str, search: &str) -> Vec<&Document> {
        let needle = search.to_lowercase();
        self.documents
            .iter()
            .filter(|doc| category == ALL_CATEGORIES || doc.area == category)
            .filter(|doc| {
                needle.is_empty()
                    || [&doc.title, &doc.area, &doc.topic]
                        .iter()
                        .any(|field| field.to_lowercase().contains(&needle))
            })
            .collect()
    }

    pub fn find(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Result of a [`CatalogStore::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This refresh's snapshot is now current.
    Installed,
    /// A newer refresh finished first; this result was dropped.
    Superseded,
}

/// Owner of the current catalog snapshot.
///
/// Refreshes may be started concurrently by the user and the orchestrator.
/// Each gets a ticket; a finished refresh only installs its snapshot when no
/// later ticket has already installed one.
pub struct CatalogStore {
    client: Arc<dyn RemoteService>,
    config: Arc<Config>,
    current: RwLock<(u64, Arc<Catalog>)>,
    tickets: AtomicU64,
}

impl CatalogStore {
    pub fn new(client: Arc<dyn RemoteService>, config: Arc<Config>) -> Self {
        Self {
            client,
            config,
            current: RwLock::new((0, Arc::new(Catalog::default()))),
            tickets: AtomicU64::new(0),
        }
    }

    /// The latest installed snapshot.
    pub fn snapshot(&self) -> Arc<Catalog> {
        match self.current.read() {
            Ok(guard) => guard.1.clone(),
            Err(poisoned) => poisoned.into_inner().1.clone(),
        }
    }

    /// Number of refreshes started so far.
    pub fn refresh_count(&self) -> u64 {
        self.tickets.load(Ordering::SeqCst)
    }

    /// Reload from the remote store and install the result if still newest.
    pub async fn refresh(&self) -> RefreshOutcome {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let catalog = Catalog::load(self.client.as_ref(), &self.config).await;
        self.install(ticket, catalog)
    }

    /// Reload and install, but keep the current snapshot when the listing
    /// fails. Returns the snapshot that is current afterwards.
    pub async fn try_refresh(&self) -> Result<Arc<Catalog>> {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let catalog = Catalog::try_load(self.client.as_ref(), &self.config).await?;
        self.install(ticket, catalog);
        Ok(self.snapshot())
    }

    fn install(&self, ticket: u64, catalog: Catalog) -> RefreshOutcome {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if ticket < guard.0 {
            debug!(ticket, installed = guard.0, "discarding stale refresh");
            return RefreshOutcome::Superseded;
        }
        *guard = (ticket, Arc::new(catalog));
        RefreshOutcome::Installed
    }
}
