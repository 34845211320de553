//! Configuration loading.
//!
//! Settings come from a TOML file (default `./config/rag.toml`). The six
//! cloud identifiers may instead be supplied through the environment
//! (`PROJECT_ID`, `LOCATION`, `DATA_STORE_ID`, `ENGINE_ID`,
//! `GCS_BUCKET_NAME`, `APP_NAME`), including a `.env` file loaded by
//! `main`. Configuration is read once at startup.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub gcp: GcpConfig,
    pub chunking: ChunkingConfig,
    pub ingest: IngestConfig,
    pub search: SearchConfig,
    pub storage: StorageConfig,
    pub agent: AgentConfig,
}

/// Cloud resource identifiers. All are required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpConfig {
    pub project_id: String,
    pub location: String,
    pub data_store_id: String,
    pub engine_id: String,
    pub bucket_name: String,
    pub app_name: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct RawGcpConfig {
    project_id: Option<String>,
    location: Option<String>,
    data_store_id: Option<String>,
    engine_id: Option<String>,
    bucket_name: Option<String>,
    app_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct RawConfig {
    #[serde(default)]
    gcp: RawGcpConfig,
    #[serde(default)]
    chunking: ChunkingConfig,
    #[serde(default)]
    ingest: IngestConfig,
    #[serde(default)]
    search: SearchConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    agent: AgentConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            concurrency: default_concurrency(),
            max_file_bytes: default_max_file_bytes(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("data/raw")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data/processed")
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.txt".to_string(),
        "**/*.csv".to_string(),
        "**/*.eml".to_string(),
    ]
}
fn default_concurrency() -> usize {
    4
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

/// Upload retry settings, converted into a [`RetryPolicy`].
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    8000
}

/// Resource whose serving config answers queries.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchResource {
    /// Search app wrapping the data store; unlocks extractive content.
    #[default]
    Engine,
    DataStore,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default)]
    pub resource: SearchResource,
    #[serde(default = "default_serving_config")]
    pub serving_config: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_answers")]
    pub max_extractive_answers: u32,
    #[serde(default = "default_max_segments")]
    pub max_extractive_segments: u32,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            resource: SearchResource::default(),
            serving_config: default_serving_config(),
            page_size: default_page_size(),
            max_extractive_answers: default_max_answers(),
            max_extractive_segments: default_max_segments(),
            timeout_secs: default_search_timeout(),
            endpoint: None,
        }
    }
}

fn default_serving_config() -> String {
    "default_search".to_string()
}
fn default_page_size() -> u32 {
    5
}
fn default_max_answers() -> u32 {
    1
}
fn default_max_segments() -> u32 {
    3
}
fn default_search_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
    /// Grounding rules included in every turn's system instruction.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Add a keyword-selected persona to the system prompt each turn.
    #[serde(default = "default_prompt_routing")]
    pub prompt_routing: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            region: default_region(),
            max_tool_calls: default_max_tool_calls(),
            timeout_secs: default_agent_timeout(),
            system_prompt: default_system_prompt(),
            prompt_routing: default_prompt_routing(),
            endpoint: None,
            retry: RetryConfig::default(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.0-flash-lite".to_string()
}
fn default_region() -> String {
    "us-central1".to_string()
}
fn default_max_tool_calls() -> usize {
    4
}
fn default_agent_timeout() -> u64 {
    60
}
fn default_prompt_routing() -> bool {
    true
}
fn default_system_prompt() -> String {
    "You answer questions using the organisation's document knowledge base. \
     Call search_knowledge_base before answering any question about the documents. \
     Base factual details only on retrieved passages and quote figures exactly. \
     If the search fails or returns nothing relevant, say that you cannot answer \
     from the knowledge base instead of guessing."
        .to_string()
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Load configuration, resolving cloud identifiers from the process environment.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an injectable environment lookup.
///
/// A missing file is treated as an empty one so the whole configuration
/// can come from the environment.
pub fn load_config_with_env<F>(path: &Path, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw: RawConfig = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content)?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults and environment");
        RawConfig::default()
    };
    resolve(raw, env)
}

/// Parse configuration from a TOML string.
pub fn parse_config<F>(content: &str, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw: RawConfig = toml::from_str(content)?;
    resolve(raw, env)
}

fn resolve<F>(raw: RawConfig, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();
    let mut required = |value: Option<String>, key: &str, var: &str| -> String {
        match value.or_else(|| env(var)).filter(|v| !v.trim().is_empty()) {
            Some(v) => v,
            None => {
                missing.push(format!("gcp.{} ({})", key, var));
                String::new()
            }
        }
    };

    let gcp = GcpConfig {
        project_id: required(raw.gcp.project_id, "project_id", "PROJECT_ID"),
        location: required(raw.gcp.location, "location", "LOCATION"),
        data_store_id: required(raw.gcp.data_store_id, "data_store_id", "DATA_STORE_ID"),
        engine_id: required(raw.gcp.engine_id, "engine_id", "ENGINE_ID"),
        bucket_name: required(raw.gcp.bucket_name, "bucket_name", "GCS_BUCKET_NAME"),
        app_name: required(raw.gcp.app_name, "app_name", "APP_NAME"),
    };

    if !missing.is_empty() {
        return Err(ConfigError::Missing(missing));
    }

    let config = Config {
        gcp,
        chunking: raw.chunking,
        ingest: raw.ingest,
        search: raw.search,
        storage: raw.storage,
        agent: raw.agent,
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

    if config.chunking.max_chars == 0 {
        return invalid("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        return invalid("chunking.overlap_chars must be < chunking.max_chars");
    }
    if config.ingest.concurrency == 0 {
        return invalid("ingest.concurrency must be >= 1");
    }
    for retry in [&config.ingest.retry, &config.agent.retry] {
        if retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be >= 1");
        }
        if retry.multiplier < 1.0 {
            return invalid("retry.multiplier must be >= 1.0");
        }
    }
    if config.search.page_size == 0 {
        return invalid("search.page_size must be >= 1");
    }
    if config.agent.max_tool_calls == 0 {
        return invalid("agent.max_tool_calls must be >= 1");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    parse_config(
        r#"
[gcp]
project_id = "demo-project"
location = "global"
data_store_id = "docs-store"
engine_id = "docs-engine"
bucket_name = "docs-bucket"
app_name = "rag-test"
"#,
        |_| None,
    )
    .expect("test config")
}
