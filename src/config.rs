use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::modes::AnalysisMode;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    /// Per-mode overrides keyed by mode name (`architect`, `executor`, `disruptor`).
    #[serde(default)]
    pub modes: HashMap<String, ModeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    200 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Where uploaded documents are staged during extraction. System temp dir when unset.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            cache_dir: default_cache_dir(),
            staging_dir: None,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("./output/.cache")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Total time allowed for one non-streaming completion.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Longest silence between reads on any response, streamed or not.
    /// Streamed reports have no total cap; a stalled stream ends after this gap.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Upper bound on concurrent map-phase requests.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            max_in_flight: default_max_in_flight(),
            temperature: None,
        }
    }
}

fn default_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}
fn default_model() -> String {
    "deepseek-chat".to_string()
}
fn default_api_key_env() -> String {
    "DEEPSEEK_API_KEY".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_read_timeout_secs() -> u64 {
    120
}
fn default_max_in_flight() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    10_000
}

/// Delivery of cached reports as a synthetic content stream.
#[derive(Debug, Deserialize, Clone)]
pub struct ReplayConfig {
    #[serde(default = "default_fragment_chars")]
    pub fragment_chars: usize,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            fragment_chars: default_fragment_chars(),
            delay_ms: default_delay_ms(),
        }
    }
}

fn default_fragment_chars() -> usize {
    64
}
fn default_delay_ms() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptsConfig {
    /// System prompt for the map phase.
    #[serde(default = "default_dehydrate_prompt")]
    pub dehydrate: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            dehydrate: default_dehydrate_prompt(),
        }
    }
}

fn default_dehydrate_prompt() -> String {
    "You compress one excerpt of a longer book. Remove filler, anecdotes that carry no \
     argument, repetition and rhetorical padding. Keep every claim, model, definition, \
     number, named study, causal chain and concrete example that supports an argument. \
     Write dense plain prose in the language of the excerpt. Do not add commentary."
        .to_string()
}

/// Optional override for one analysis mode. Unset fields keep the built-in value.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModeConfig {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Loads `path` if it exists; otherwise returns built-in defaults.
///
/// Used for the default config location, which is allowed to be absent.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    if config.llm.max_in_flight == 0 {
        anyhow::bail!("llm.max_in_flight must be >= 1");
    }

    if config.llm.timeout_secs == 0
        || config.llm.connect_timeout_secs == 0
        || config.llm.read_timeout_secs == 0
    {
        anyhow::bail!("llm timeouts must be > 0");
    }

    if config.llm.base_url.trim().is_empty() {
        anyhow::bail!("llm.base_url must not be empty");
    }

    if config.replay.fragment_chars == 0 {
        anyhow::bail!("replay.fragment_chars must be > 0");
    }

    for (key, mode) in &config.modes {
        if key.parse::<AnalysisMode>().is_err() {
            anyhow::bail!(
                "Unknown mode: '{}'. Must be one of: {}",
                key,
                AnalysisMode::ALL
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        if matches!(&mode.system_prompt, Some(p) if p.trim().is_empty()) {
            anyhow::bail!("modes.{}.system_prompt must not be empty", key);
        }
    }

    Ok(())
}
