//! TOML configuration parsing and validation.
//!
//! ```toml
//! [workspace]
//! token_env = "NOTION_TOKEN"
//!
//! [chat]
//! model = "gpt-4o"
//!
//! [snapshot]
//! location = "data/snapshot.json"      # or "s3://bucket/key"
//!
//! [search]
//! filter_guide = "config/filter_guide.txt"
//!
//! [search.table_instructions]
//! "0f6c...e1" = "Completed tasks have Status = Done."
//!
//! [agent]
//! timezone = "America/Puerto_Rico"
//! ```
//!
//! Every section has defaults, so an empty file is a valid configuration
//! apart from the secrets, which are always read from the environment
//! variables named by `token_env` and `api_key_env`.

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_url: default_workspace_url(),
            api_version: default_api_version(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            page_size: default_page_size(),
        }
    }
}

impl WorkspaceConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.timeout_secs))
    }
}

fn default_workspace_url() -> String {
    "https://api.notion.com".to_string()
}
fn default_api_version() -> String {
    "2022-06-28".to_string()
}
fn default_token_env() -> String {
    "NOTION_TOKEN".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_page_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_chat_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: 0.0,
            timeout_secs: default_chat_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl ChatConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.timeout_secs))
    }
}

fn default_chat_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_chat_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    /// Rows sampled per table for the summary's example titles.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    /// Child blocks read per page for its summary.
    #[serde(default = "default_max_blocks")]
    pub max_blocks: usize,
    /// Items summarized in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            sample_rows: default_sample_rows(),
            max_blocks: default_max_blocks(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_sample_rows() -> usize {
    3
}
fn default_max_blocks() -> usize {
    20
}
fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    /// A file path or an `s3://bucket/key` URL.
    #[serde(default = "default_snapshot_location")]
    pub location: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3 endpoint (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            location: default_snapshot_location(),
            region: default_region(),
            endpoint_url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl SnapshotConfig {
    /// Deadline and retries for S3 reads and writes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.timeout_secs))
    }
}

fn default_snapshot_location() -> String {
    "data/snapshot.json".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Path to the static filter-writing guide.
    #[serde(default = "default_filter_guide")]
    pub filter_guide: PathBuf,
    /// Tables filtered and queried in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Upper bound on rows returned per table.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// Extra filter guidance keyed by table id.
    #[serde(default)]
    pub table_instructions: HashMap<String, String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            filter_guide: default_filter_guide(),
            concurrency: default_concurrency(),
            max_rows: default_max_rows(),
            table_instructions: HashMap::new(),
        }
    }
}

fn default_filter_guide() -> PathBuf {
    PathBuf::from("config/filter_guide.txt")
}
fn default_max_rows() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Reasoning/tool-execution cycles allowed per run.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,
    /// Most recent conversation messages sent to the chat service.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// IANA zone used for the "current time" reference.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_status")]
    pub default_status: String,
    #[serde(default = "default_priority")]
    pub default_priority: String,
    #[serde(default = "default_priority_order")]
    pub priority_order: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            history_cap: default_history_cap(),
            timezone: default_timezone(),
            default_status: default_status(),
            default_priority: default_priority(),
            priority_order: default_priority_order(),
        }
    }
}

impl AgentConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("agent.timezone '{}' is not an IANA zone: {}", self.timezone, e))
    }
}

fn default_max_cycles() -> usize {
    8
}
fn default_history_cap() -> usize {
    40
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_status() -> String {
    "Not started".to_string()
}
fn default_priority() -> String {
    "ASAP".to_string()
}
fn default_priority_order() -> Vec<String> {
    ["Today", "ASAP", "High", "Medium", "Low", "People"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.workspace.timeout_secs == 0 {
        bail!("workspace.timeout_secs must be > 0");
    }
    if !(1..=100).contains(&config.workspace.page_size) {
        bail!("workspace.page_size must be in [1, 100]");
    }
    if config.chat.timeout_secs == 0 {
        bail!("chat.timeout_secs must be > 0");
    }
    if !(0.0..=2.0).contains(&config.chat.temperature) {
        bail!("chat.temperature must be in [0.0, 2.0]");
    }

    if config.indexer.concurrency == 0 {
        bail!("indexer.concurrency must be >= 1");
    }
    if config.indexer.max_blocks == 0 || config.indexer.max_blocks > 100 {
        bail!("indexer.max_blocks must be in [1, 100]");
    }
    if config.indexer.sample_rows > 100 {
        bail!("indexer.sample_rows must be <= 100");
    }

    if config.snapshot.location.trim().is_empty() {
        bail!("snapshot.location must not be empty");
    }
    if config.snapshot.timeout_secs == 0 {
        bail!("snapshot.timeout_secs must be > 0");
    }

    if config.search.concurrency == 0 {
        bail!("search.concurrency must be >= 1");
    }
    if config.search.max_rows == 0 {
        bail!("search.max_rows must be >= 1");
    }

    if config.agent.max_cycles == 0 {
        bail!("agent.max_cycles must be >= 1");
    }
    if config.agent.history_cap < 2 {
        bail!("agent.history_cap must be >= 2");
    }
    config.agent.tz()?;

    Ok(())
}

/// Read a secret from the environment variable named in the config.
pub fn secret_from_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("{} environment variable not set", var),
    }
}
