//! Document list rendering and the modal markdown viewer.
//!
//! Markdown goes through a [`MarkdownRenderer`]; the default
//! [`CommonMarkRenderer`] uses `pulldown-cmark` with tables and
//! strikethrough enabled, matching what generated research documents use.

use pulldown_cmark::{html, Event, Options, Parser};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::error::{ResearchError, Result};
use crate::models::Document;

/// Shown instead of an empty list.
pub const EMPTY_PLACEHOLDER: &str = "No documents match your filters.";

/// Viewer title when a document has none.
pub const DEFAULT_VIEWER_TITLE: &str = "Research Document";

/// Parses markdown into the event stream that HTML and PDF output are both
/// built from.
pub trait MarkdownRenderer: Send + Sync {
    fn events<'a>(&self, markdown: &'a str) -> Result<Vec<Event<'a>>>;

    fn to_html(&self, markdown: &str) -> Result<String> {
        let events = self.events(markdown)?;
        Ok(events_to_html(events, markdown.len()))
    }
}

/// Serialize a parsed event stream to HTML.
pub fn events_to_html<'a>(events: impl IntoIterator<Item = Event<'a>>, hint: usize) -> String {
    let mut out = String::with_capacity(hint * 3 / 2);
    html::push_html(&mut out, events.into_iter());
    out
}

pub fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CommonMarkRenderer;

impl MarkdownRenderer for CommonMarkRenderer {
    fn events<'a>(&self, markdown: &'a str) -> Result<Vec<Event<'a>>> {
        if markdown.contains('\0') {
            return Err(ResearchError::Render(
                "document contains binary data".to_string(),
            ));
        }
        Ok(Parser::new_ext(markdown, markdown_options()).collect())
    }
}

/// Escape text for HTML element and attribute content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Writing into a String cannot fail.
    let _ = pulldown_cmark_escape::escape_html(&mut out, text);
    out
}

// ============ Document list ============

/// One rendered row of the document list.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DocumentRow {
    pub id: String,
    pub title: String,
    /// `Mar 4, 2025 • Markets • GDP`
    pub meta: String,
}

/// A rendered (possibly empty) document list.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListView {
    Empty { message: String },
    Rows { rows: Vec<DocumentRow> },
}

pub fn render_list(documents: &[&Document]) -> ListView {
    if documents.is_empty() {
        return ListView::Empty {
            message: EMPTY_PLACEHOLDER.to_string(),
        };
    }
    ListView::Rows {
        rows: documents
            .iter()
            .map(|doc| DocumentRow {
                id: doc.id.clone(),
                title: doc.title.clone(),
                meta: format!("{} • {} • {}", doc.when, doc.area, doc.topic),
            })
            .collect(),
    }
}

impl ListView {
    pub fn len(&self) -> usize {
        match self {
            ListView::Empty { .. } => 0,
            ListView::Rows { rows } => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_html(&self) -> String {
        match self {
            ListView::Empty { message } => {
                format!("<div class=\"empty\">{}</div>", escape_html(message))
            }
            ListView::Rows { rows } => rows
                .iter()
                .map(|row| {
                    format!(
                        concat!(
                            "<div class=\"doc\" data-doc-id=\"{id}\">",
                            "<div class=\"doc-info\"><div class=\"tt\">{title}</div>",
                            "<div class=\"meta\">{meta}</div></div>",
                            "<div class=\"actions\">",
                            "<button class=\"doc-action view-action\">view</button>",
                            "<button class=\"doc-action download-action\">download</button>",
                            "<button class=\"doc-action delete-action\">delete</button>",
                            "</div></div>"
                        ),
                        id = escape_html(&row.id),
                        title = escape_html(&row.title),
                        meta = escape_html(&row.meta),
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Terminal rendering: one document per line.
    pub fn to_text(&self) -> String {
        match self {
            ListView::Empty { message } => message.clone(),
            ListView::Rows { rows } => rows
                .iter()
                .map(|row| format!("{:<26} {}\n{:<26} {}", row.id, row.title, "", row.meta))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

// ============ Viewer ============

/// Bounding box of the modal, in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }
}

/// Ways the user can try to close the viewer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dismiss {
    CloseButton,
    /// A click at the given point; only closes when outside the modal.
    Click { x: f64, y: f64 },
    /// Escape / cancel key.
    Escape,
}

/// The document currently shown in the viewer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OpenDocument {
    pub title: String,
    pub markdown: String,
    pub html: String,
    /// True when `html` is an inline render-error message.
    pub failed: bool,
}

/// Modal markdown viewer.
pub struct Viewer {
    renderer: Arc<dyn MarkdownRenderer>,
    bounds: Rect,
    open: Option<OpenDocument>,
}

impl Viewer {
    pub fn new(renderer: Arc<dyn MarkdownRenderer>, bounds: Rect) -> Self {
        Self {
            renderer,
            bounds,
            open: None,
        }
    }

    /// Render `content` and show it. A render failure still opens the
    /// viewer, with an inline error in place of the document.
    pub fn open(&mut self, content: &str, title: &str) -> &OpenDocument {
        let title = if title.trim().is_empty() {
            DEFAULT_VIEWER_TITLE.to_string()
        } else {
            title.to_string()
        };

        let (html, failed) = match self.renderer.to_html(content) {
            Ok(html) => (html, false),
            Err(e) => {
                error!(error = %e, %title, "error rendering markdown");
                (
                    format!(
                        "<div class=\"error\">Failed to render document: {}</div>",
                        escape_html(&e.to_string())
                    ),
                    true,
                )
            }
        };

        self.open.insert(OpenDocument {
            title,
            markdown: content.to_string(),
            html,
            failed,
        })
    }

    /// Close the viewer if `reason` warrants it. Returns whether it closed.
    pub fn dismiss(&mut self, reason: Dismiss) -> bool {
        if self.open.is_none() {
            return false;
        }
        let close = match reason {
            Dismiss::CloseButton | Dismiss::Escape => true,
            Dismiss::Click { x, y } => !self.bounds.contains(x, y),
        };
        if close {
            self.open = None;
        }
        close
    }

    pub fn current(&self) -> Option<&OpenDocument> {
        self.open.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }
}

/// Standalone HTML page for an open document, used by the HTTP surface.
pub fn viewer_page(doc: &OpenDocument) -> String {
    format!(
        concat!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>",
            "<body><dialog id=\"viewer\" open><header><h2 id=\"viewerTitle\">{title}</h2>",
            "<button id=\"closeViewer\" onclick=\"history.back()\">close</button></header>",
            "<div id=\"viewerFrame\" class=\"viewer-content\">{body}</div></dialog></body></html>"
        ),
        title = escape_html(&doc.title),
        body = doc.html,
    )
}
