//! Error taxonomy for the research front-end.
//!
//! Every library operation returns [`Result<T>`]. The binary and the config
//! loader wrap these in `anyhow` with context; nothing here is fatal to the
//! process.

use thiserror::Error;

/// Errors surfaced by the remote client, catalog, viewer and orchestrator.
#[derive(Error, Debug)]
pub enum ResearchError {
    /// The remote service could not be reached or the request timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote service answered with a non-2xx status.
    #[error("API call failed: {status} {message}")]
    Api { status: u16, message: String },

    /// A 2xx response whose body could not be parsed.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// A raw object could not be mapped to a document.
    #[error("cannot transform object: {0}")]
    Transform(String),

    /// The user attempted an action without its required selections.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Completion was not detected within the configured attempts.
    #[error("research generation timed out after {attempts} checks")]
    JobTimeout { attempts: u32 },

    /// The job failed remotely or status checks kept failing.
    #[error("research generation failed: {0}")]
    JobFailed(String),

    /// The job was cancelled while its submission was still in flight.
    #[error("research generation was cancelled")]
    Cancelled,

    /// Markdown could not be rendered.
    #[error("failed to render document: {0}")]
    Render(String),

    /// PDF generation or writing failed.
    #[error("PDF export failed: {0}")]
    Export(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResearchError {
    /// True for failures worth retrying on the next poll tick.
    pub fn is_transient(&self) -> bool {
        match self {
            ResearchError::Transport(_) | ResearchError::Decode(_) => true,
            ResearchError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ResearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = ResearchError::Api {
            status: 503,
            message: "Service Unavailable".into(),
        };
        assert!(err.is_transient());
        assert!(ResearchError::Transport("reset".into()).is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        let err = ResearchError::Api {
            status: 404,
            message: "Not Found".into(),
        };
        assert!(!err.is_transient());
        assert!(!ResearchError::Validation("no topic".into()).is_transient());
    }

    #[test]
    fn api_error_message_includes_status() {
        let err = ResearchError::Api {
            status: 401,
            message: "Unauthorized".into(),
        };
        assert_eq!(err.to_string(), "API call failed: 401 Unauthorized");
    }
}
