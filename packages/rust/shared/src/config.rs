//! Application configuration for CodeMatch.
//!
//! User config lives at `~/.codematch/codematch.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CodeMatchError, Result};
use crate::types::CodeSystem;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "codematch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".codematch";

/// Default credentials file name inside the config directory.
const CREDENTIALS_FILE_NAME: &str = "credentials.json";

// ---------------------------------------------------------------------------
// Config structs (matching codematch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Retrieval defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Search backend connection.
    #[serde(default)]
    pub search: SearchConfig,

    /// Language model endpoint.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Index names per code system.
    #[serde(default)]
    pub indexes: IndexesConfig,
}

impl AppConfig {
    /// Index holding the given code system's documents.
    pub fn index_for(&self, system: CodeSystem) -> &str {
        match system {
            CodeSystem::Loinc => &self.indexes.loinc,
            CodeSystem::Icd10Cm => &self.indexes.icd10cm,
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Number of candidates to retrieve.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Document field holding the code.
    #[serde(default = "default_code_field")]
    pub code_field: String,

    /// Document field holding the description; also the match target.
    #[serde(default = "default_label_field")]
    pub label_field: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            code_field: default_code_field(),
            label_field: default_label_field(),
        }
    }
}

fn default_top_n() -> usize {
    50
}
fn default_code_field() -> String {
    "concept_code".into()
}
fn default_label_field() -> String {
    "concept_name".into()
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the OpenSearch/Elasticsearch cluster.
    #[serde(default = "default_search_host")]
    pub host: String,

    /// Path to the JSON credentials file. `~` is expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Skip TLS certificate verification (self-signed dev clusters).
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Cluster-wide `indices.query.bool.max_clause_count`, applied once at
    /// client setup when set. Only needed on engines that cap clause counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_clause_count: Option<u32>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            host: default_search_host(),
            credentials_path: None,
            timeout_secs: default_search_timeout(),
            accept_invalid_certs: false,
            max_clause_count: None,
        }
    }
}

fn default_search_host() -> String {
    "https://localhost:9200".into()
}
fn default_search_timeout() -> u64 {
    30
}

/// `[completion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL of an OpenAI-compatible API (`/chat/completions` is appended).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Sampling temperature. Keep at 0 for deterministic extraction.
    #[serde(default)]
    pub temperature: f32,

    /// Per-request timeout.
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,

    /// Prompts longer than this are rejected before sending.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            max_output_tokens: default_max_output_tokens(),
            temperature: 0.0,
            timeout_secs: default_completion_timeout(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4".into()
}
fn default_max_output_tokens() -> u32 {
    100
}
fn default_completion_timeout() -> u64 {
    60
}
fn default_max_prompt_chars() -> usize {
    48_000
}

/// `[indexes]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexesConfig {
    #[serde(default = "default_loinc_index")]
    pub loinc: String,

    #[serde(default = "default_icd10cm_index")]
    pub icd10cm: String,
}

impl Default for IndexesConfig {
    fn default() -> Self {
        Self {
            loinc: default_loinc_index(),
            icd10cm: default_icd10cm_index(),
        }
    }
}

fn default_loinc_index() -> String {
    "loincdb_without_component".into()
}
fn default_icd10cm_index() -> String {
    "icd_index".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.codematch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CodeMatchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.codematch/codematch.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| CodeMatchError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

impl SearchConfig {
    /// Resolved credentials file path (configured, or `~/.codematch/credentials.json`).
    pub fn credentials_file(&self) -> Result<PathBuf> {
        match &self.credentials_path {
            Some(p) => expand_home(p),
            None => Ok(config_dir()?.join(CREDENTIALS_FILE_NAME)),
        }
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CodeMatchError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| CodeMatchError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CodeMatchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CodeMatchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CodeMatchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the completion API key from the env var named in config.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.completion.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(CodeMatchError::config(format!(
            "completion API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that the completion API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    resolve_api_key(config).map(|_| ())
}
