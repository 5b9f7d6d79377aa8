//! Core data models shared across the client, catalog and orchestrator.
//!
//! [`RawObject`] mirrors what the remote object store returns; [`Document`]
//! is the derived record the catalog displays. The research parameter axes
//! are closed enums so that an invalid label can never reach a task prompt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ResearchError;

/// An object as returned by `GET /objects` and `GET /objects/{id}`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RawObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub content: Option<ObjectContent>,
}

impl RawObject {
    /// A string-valued metadata property, ignoring blanks.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ObjectContent {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A research document derived from a [`RawObject`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub area: String,
    pub topic: String,
    /// `None` when the object carried no parseable timestamp.
    pub created_at: Option<DateTime<Utc>>,
    pub content_source: Option<String>,
    /// Display date such as `Mar 4, 2025`, or `Recent`.
    pub when: String,
}

/// Response of `POST /objects/download-url`.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadUrl {
    pub url: String,
}

/// Identifier of a submitted generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Response of `GET /jobs/{id}`. Only `status` is interpreted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub status: Option<String>,
}

impl JobStatus {
    /// True when the remote side reports the job as dead.
    pub fn is_failed(&self) -> bool {
        matches!(
            self.status.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("failed" | "error" | "canceled" | "cancelled")
        )
    }
}

// ============ Research parameters ============

/// Which segmented control a parameter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamAxis {
    Depth,
    Rigor,
    Focus,
}

impl FromStr for ParamAxis {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "depth" => Ok(ParamAxis::Depth),
            "rigor" => Ok(ParamAxis::Rigor),
            "focus" => Ok(ParamAxis::Focus),
            other => Err(ResearchError::Validation(format!(
                "unknown parameter group '{}'",
                other
            ))),
        }
    }
}

macro_rules! param_enum {
    ($name:ident { $($variant:ident => $label:literal, $short:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn short_label(self) -> &'static str {
                match self {
                    $($name::$variant => $short),+
                }
            }

            fn index(self) -> usize {
                Self::ALL.iter().position(|v| *v == self).unwrap_or(0)
            }

            /// The neighbouring option, wrapping at either end.
            pub fn cycle(self, forward: bool) -> Self {
                let len = Self::ALL.len();
                let next = if forward {
                    (self.index() + 1) % len
                } else {
                    (self.index() + len - 1) % len
                };
                Self::ALL[next]
            }
        }

        impl FromStr for $name {
            type Err = ResearchError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.label().eq_ignore_ascii_case(s) || v.short_label().eq_ignore_ascii_case(s))
                    .ok_or_else(|| ResearchError::Validation(format!(
                        "unknown {} '{}'", stringify!($name).to_ascii_lowercase(), s
                    )))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

param_enum!(Depth {
    HighLevel => "High-Level", "High-Level",
    Focused => "Focused", "Focused",
    Comprehensive => "Comprehensive", "Comprehensive",
});

param_enum!(Rigor {
    EssentialPoints => "Essential Points", "Essential",
    DetailedAnalysis => "Detailed Analysis", "Detailed",
    ExhaustiveResearch => "Exhaustive Research", "Exhaustive",
});

param_enum!(Focus {
    InvestmentResearch => "Investment Research", "Investment",
    EducationalSummary => "Educational Summary", "Educational",
    TechnicalAnalysis => "Technical Analysis", "Technical",
});

/// The three segmented-control selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchParams {
    pub depth: Depth,
    pub rigor: Rigor,
    pub focus: Focus,
}

impl Default for ResearchParams {
    fn default() -> Self {
        Self {
            depth: Depth::Focused,
            rigor: Rigor::DetailedAnalysis,
            focus: Focus::InvestmentResearch,
        }
    }
}

impl ResearchParams {
    /// Set one axis from its label.
    pub fn set(&mut self, axis: ParamAxis, value: &str) -> Result<(), ResearchError> {
        match axis {
            ParamAxis::Depth => self.depth = value.parse()?,
            ParamAxis::Rigor => self.rigor = value.parse()?,
            ParamAxis::Focus => self.focus = value.parse()?,
        }
        Ok(())
    }

    /// Move one axis left or right, wrapping around.
    pub fn nudge(&mut self, axis: ParamAxis, forward: bool) {
        match axis {
            ParamAxis::Depth => self.depth = self.depth.cycle(forward),
            ParamAxis::Rigor => self.rigor = self.rigor.cycle(forward),
            ParamAxis::Focus => self.focus = self.focus.cycle(forward),
        }
    }

    /// `Focused • Detailed • Investment`
    pub fn summary(&self) -> String {
        [
            self.depth.short_label(),
            self.rigor.short_label(),
            self.focus.short_label(),
        ]
        .join(" • ")
    }

    /// `Focused • Detailed Analysis • Investment Research`
    pub fn details(&self) -> String {
        [self.depth.label(), self.rigor.label(), self.focus.label()].join(" • ")
    }
}

/// What the user asked to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub area: String,
    pub topic: String,
    #[serde(default)]
    pub params: ResearchParams,
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<(), ResearchError> {
        if self.area.trim().is_empty() || self.topic.trim().is_empty() {
            return Err(ResearchError::Validation(
                "select both an area and a topic".to_string(),
            ));
        }
        Ok(())
    }

    /// The natural-language task sent to the generation interaction.
    pub fn task_prompt(&self) -> String {
        format!(
            "{}: Depth - {}, Rigor - {}, Focus - {}",
            self.topic,
            self.params.depth.label(),
            self.params.rigor.label(),
            self.params.focus.label()
        )
    }
}
