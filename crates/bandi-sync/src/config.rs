//! Run configuration and the `sources.yaml` registry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bandi_storage::{BackoffPolicy, HttpClientConfig};
use indexmap::IndexMap;
use serde::Deserialize;
use tokio::fs;

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub output_dir: PathBuf,
    /// Politeness delay between requests; doubled after an empty page.
    pub delay: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_retries: usize,
    pub max_empty_pages: usize,
    pub max_records: Option<usize>,
    pub sources_file: PathBuf,
    pub ledger_path: PathBuf,
    pub cloudflare_retry: bool,
    pub relaxed_tls: bool,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            max_retries: 3,
            max_empty_pages: 3,
            max_records: None,
            sources_file: PathBuf::from("sources.yaml"),
            ledger_path: PathBuf::from("to_scrape.json"),
            cloudflare_retry: true,
            relaxed_tls: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
}

impl ScrapeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            output_dir: std::env::var("BANDI_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            delay: env_parse("BANDI_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay),
            connect_timeout: env_parse("BANDI_CONNECT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            read_timeout: env_parse("BANDI_READ_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.read_timeout),
            max_retries: env_parse("BANDI_MAX_RETRIES").unwrap_or(defaults.max_retries),
            max_empty_pages: env_parse("BANDI_MAX_EMPTY_PAGES").unwrap_or(defaults.max_empty_pages),
            max_records: None,
            sources_file: std::env::var("BANDI_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.sources_file),
            ledger_path: std::env::var("BANDI_LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ledger_path),
            cloudflare_retry: env_flag("BANDI_CLOUDFLARE_RETRY")
                .unwrap_or(defaults.cloudflare_retry),
            relaxed_tls: env_flag("BANDI_RELAXED_TLS").unwrap_or(defaults.relaxed_tls),
        }
    }

    /// Fetch-tier settings for one run.
    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                ..BackoffPolicy::default()
            },
            retry_statuses: HttpClientConfig::base_retry_statuses(self.cloudflare_retry),
            enable_relaxed_tls: self.relaxed_tls,
            ..HttpClientConfig::default()
        }
    }
}

/// Column layout of a dataset's CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    #[default]
    Fixed,
    Dynamic,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    pub enabled: bool,
    pub dataset: String,
    /// Overrides the adapter's listing URL; may be a local path.
    #[serde(default)]
    pub listing_url: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Overrides the adapter's page cap.
    #[serde(default)]
    pub max_pages: Option<usize>,
    /// Listing search filters, sent with every page request.
    #[serde(default)]
    pub filters: IndexMap<String, String>,
    #[serde(default = "default_true")]
    pub follow_details: bool,
    #[serde(default)]
    pub schema: SchemaKind,
    #[serde(default)]
    pub valid_prefix: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }
}
