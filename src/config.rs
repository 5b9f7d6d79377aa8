//! TOML configuration parsing.
//!
//! All settings are static for the lifetime of the process. Every section
//! has defaults matching the deployed service, so a config file only needs
//! to override what differs:
//!
//! ```toml
//! [api]
//! base_url = "https://api.vertesia.io/api/v1"
//! environment_id = "681915c6a01fb262a410c161"
//!
//! [generation]
//! strategy = "poll"
//! poll_interval_secs = 15
//!
//! [[taxonomy]]
//! area = "Markets"
//! topics = ["Employment", "Credit", "GDP"]
//! ```
//!
//! The API key may be omitted from the file and supplied through the
//! `RESEARCH_API_KEY` environment variable instead.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable consulted when `api.api_key` is empty.
pub const API_KEY_ENV: &str = "RESEARCH_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_taxonomy")]
    pub taxonomy: Vec<AreaTopics>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_environment_id")]
    pub environment_id: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_interaction")]
    pub interaction: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            environment_id: default_environment_id(),
            model: default_model(),
            interaction: default_interaction(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.vertesia.io/api/v1".to_string()
}
fn default_environment_id() -> String {
    "681915c6a01fb262a410c161".to_string()
}
fn default_model() -> String {
    "publishers/anthropic/models/claude-3-7-sonnet".to_string()
}
fn default_interaction() -> String {
    "AGENTAdvisorDeepResearch".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// How the orchestrator notices that a job produced its document.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStrategy {
    /// Check job status and look for a new prefixed object each interval.
    #[default]
    Poll,
    /// Refresh the whole catalog each interval and compare counts.
    Refresh,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default)]
    pub strategy: CompletionStrategy,
    #[serde(default = "default_estimated_duration_secs")]
    pub estimated_duration_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_start_delay_secs")]
    pub poll_start_delay_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_max_transient_errors")]
    pub max_transient_errors: u32,
    #[serde(default = "default_completion_dwell_secs")]
    pub completion_dwell_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            strategy: CompletionStrategy::default(),
            estimated_duration_secs: default_estimated_duration_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_start_delay_secs: default_poll_start_delay_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            max_transient_errors: default_max_transient_errors(),
            completion_dwell_secs: default_completion_dwell_secs(),
        }
    }
}

fn default_estimated_duration_secs() -> u64 {
    5 * 60
}
fn default_poll_interval_secs() -> u64 {
    15
}
fn default_poll_start_delay_secs() -> u64 {
    5 * 60
}
fn default_max_poll_attempts() -> u32 {
    20
}
fn default_max_transient_errors() -> u32 {
    3
}
fn default_completion_dwell_secs() -> u64 {
    4
}

impl GenerationConfig {
    pub fn estimated_duration(&self) -> Duration {
        Duration::from_secs(self.estimated_duration_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_start_delay(&self) -> Duration {
        Duration::from_secs(self.poll_start_delay_secs)
    }

    pub fn completion_dwell(&self) -> Duration {
        Duration::from_secs(self.completion_dwell_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_prefix() -> String {
    "DeepResearch_".to_string()
}
fn default_batch_size() -> u32 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

/// One research area and its ordered topics.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct AreaTopics {
    pub area: String,
    pub topics: Vec<String>,
}

impl AreaTopics {
    fn new(area: &str, topics: &[&str]) -> Self {
        Self {
            area: area.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }
}

fn default_taxonomy() -> Vec<AreaTopics> {
    vec![
        AreaTopics::new(
            "Markets",
            &[
                "Employment",
                "Credit",
                "Commodities",
                "Futures",
                "Inflation",
                "GDP",
                "Interest Rates",
            ],
        ),
        AreaTopics::new(
            "Sectors",
            &[
                "Technology",
                "Healthcare",
                "Energy",
                "Financials",
                "Industrials",
                "Consumer",
                "Utilities",
            ],
        ),
        AreaTopics::new(
            "Assets",
            &[
                "NVDA (Equity)",
                "TSM (Equity)",
                "ASML (Equity)",
                "MSFT (Equity)",
                "AAPL (Equity)",
                "IONQ (Equity)",
                "SPGI (Equity)",
                "CME (Equity)",
                "VTI (ETF)",
                "VEA (ETF)",
                "VWO (ETF)",
                "BND (ETF)",
            ],
        ),
        AreaTopics::new(
            "Concepts",
            &[
                "ETFs Explained",
                "Semiconductor Supply Chain",
                "Tax Strategy",
                "Treasury Securities",
                "Options Fundamentals",
                "Leveraged Investing",
            ],
        ),
    ]
}

impl Config {
    /// Defaults for every section, used when no config file exists.
    pub fn minimal() -> Self {
        Self {
            api: ApiConfig::default(),
            generation: GenerationConfig::default(),
            documents: DocumentsConfig::default(),
            server: ServerConfig::default(),
            taxonomy: default_taxonomy(),
        }
    }

    /// Topics configured for `area`, empty when the area is unknown.
    pub fn topics_for(&self, area: &str) -> &[String] {
        self.taxonomy
            .iter()
            .find(|a| a.area == area)
            .map(|a| a.topics.as_slice())
            .unwrap_or(&[])
    }

    pub fn areas(&self) -> impl Iterator<Item = &str> {
        self.taxonomy.iter().map(|a| a.area.as_str())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    apply_env(&mut config);
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the built-in defaults
/// (still honouring `RESEARCH_API_KEY`).
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    tracing::debug!(path = %path.display(), "no config file, using defaults");
    let mut config = Config::minimal();
    apply_env(&mut config);
    Ok(config)
}

/// Parse and validate config text without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn apply_env(config: &mut Config) {
    if config.api.api_key.is_empty() {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            config.api.api_key = key;
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    if !config.api.base_url.starts_with("http://") && !config.api.base_url.starts_with("https://")
    {
        anyhow::bail!(
            "api.base_url must be an http(s) URL, got '{}'",
            config.api.base_url
        );
    }

    let generation = &config.generation;
    if generation.poll_interval_secs == 0 {
        anyhow::bail!("generation.poll_interval_secs must be > 0");
    }
    if generation.max_poll_attempts == 0 {
        anyhow::bail!("generation.max_poll_attempts must be >= 1");
    }

    if config.documents.prefix.is_empty() {
        anyhow::bail!("documents.prefix must not be empty");
    }
    if config.documents.batch_size == 0 {
        anyhow::bail!("documents.batch_size must be > 0");
    }

    for area in &config.taxonomy {
        if area.area.trim().is_empty() {
            anyhow::bail!("taxonomy entries need a non-empty area name");
        }
        if area.area == crate::catalog::ALL_CATEGORIES {
            anyhow::bail!("'{}' is reserved and cannot be an area", area.area);
        }
    }

    Ok(())
}
