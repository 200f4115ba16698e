//! TOML configuration parsing and validation.
//!
//! All components read their settings from a single config file (default:
//! `config/pgraph.toml`). Sections map one-to-one onto subsystems:
//!
//! | Section | Consumer |
//! |---------|----------|
//! | `[server]` | HTTP server bind address |
//! | `[data]` | Input/output directories for JSON-lines files |
//! | `[embeddings]` | Embedding provider, model, endpoint |
//! | `[vector_index]` | Qdrant or the in-process JSONL fallback |
//! | `[graph]` | Graph backend plus Pass-1/Pass-2 fan-out knobs |
//! | `[llm]` / `[llm.providers.*]` | Chat model providers and retry policy |
//! | `[inference]` | Retrieval defaults (anchors, depth, confidence floor) |
//! | `[ingestion]` | Which pipeline stages run |
//! | `[devmode]` | Corpus truncation for fast iteration |
//! | `[prompts]` | Prompt asset directory and system-prompt files |
//! | `[logging]` | Per-run transcript log directory |
//!
//! API keys may be written as `${ENV_VAR}` placeholders; they are
//! substituted from the environment at load time, and `OPENAI_API_KEY` is
//! honored directly for the `openai` provider.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub data: DataConfig,
    pub embeddings: EmbeddingsConfig,
    pub vector_index: VectorIndexConfig,
    pub graph: GraphConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub devmode: DevModeConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
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
    "127.0.0.1:8900".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("data/input")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data/output")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingsConfig {
    /// `"ollama"` or `"openai"`.
    pub provider: String,
    pub model: String,
    /// Full endpoint URL for the embeddings API.
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorIndexConfig {
    /// `"qdrant"` or `"jsonl"` (the in-process fallback).
    pub provider: String,
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection_name: String,
    /// Embedding dimensionality; every stored vector must have this length.
    pub vector_size: usize,
    /// Directory for the fallback store file (`vectors.jsonl`).
    #[serde(default = "default_vector_path")]
    pub path: PathBuf,
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}
fn default_collection() -> String {
    "messages".to_string()
}
fn default_vector_path() -> PathBuf {
    PathBuf::from("data/vector_index")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// `"neo4j"` or `"memory"`.
    pub provider: String,
    #[serde(default = "default_neo4j_uri")]
    pub uri: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Top-K for Pass-1 similarity search per message.
    #[serde(default = "default_similarity_anchors")]
    pub similarity_anchors: usize,
    /// Per-neighbor frontier size for Pass-2 work units.
    #[serde(default = "default_semantic_frontier")]
    pub semantic_frontier: usize,
}

fn default_neo4j_uri() -> String {
    "neo4j://localhost:7687".to_string()
}
fn default_similarity_anchors() -> usize {
    5
}
fn default_semantic_frontier() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Which entry of `providers` to use: `"ollama"` or `"openai"`.
    pub provider: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Work units per Pass-2 LLM call.
    #[serde(default = "default_batch_size")]
    pub inference_batch_size: usize,
    /// Concurrent Pass-2 batches in flight.
    #[serde(default = "default_concurrency")]
    pub llm_concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    pub providers: HashMap<String, ProviderConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

fn default_timeout_secs() -> u64 {
    120
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f64 {
    0.2
}
fn default_batch_size() -> usize {
    10
}
fn default_concurrency() -> usize {
    1
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    #[serde(default = "default_max_anchors")]
    pub max_similarity_anchors: usize,
    #[serde(default = "default_max_related")]
    pub max_related_messages: usize,
    #[serde(default = "default_max_depth")]
    pub max_related_depth: usize,
    #[serde(default)]
    pub min_confidence: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_similarity_anchors: default_max_anchors(),
            max_related_messages: default_max_related(),
            max_related_depth: default_max_depth(),
            min_confidence: 0.0,
        }
    }
}

fn default_max_anchors() -> usize {
    3
}
fn default_max_related() -> usize {
    10
}
fn default_max_depth() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestionConfig {
    /// Stage names to run, in pipeline order. Unknown names are rejected.
    #[serde(default)]
    pub stages: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DevModeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_max_messages() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptsConfig {
    #[serde(default = "default_prompts_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_build_prompt")]
    pub build_system_prompt_file: String,
    #[serde(default = "default_inference_prompt")]
    pub inference_system_prompt_file: String,
    #[serde(default = "default_evaluation_prompt")]
    pub evaluation_system_prompt_file: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            dir: default_prompts_dir(),
            build_system_prompt_file: default_build_prompt(),
            inference_system_prompt_file: default_inference_prompt(),
            evaluation_system_prompt_file: default_evaluation_prompt(),
        }
    }
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("data/prompts")
}
fn default_build_prompt() -> String {
    "build_system_prompt.txt".to_string()
}
fn default_inference_prompt() -> String {
    "inference_system_prompt.txt".to_string()
}
fn default_evaluation_prompt() -> String {
    "evaluation_system_prompt.txt".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("data/logs")
}

/// The five ingestion stages, in pipeline order.
pub const STAGES: [&str; 5] = [
    "embedding",
    "semantic_search",
    "graph_construction",
    "graph_construction_pass_1",
    "graph_construction_pass_2",
];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Substitute ${ENV_VAR} placeholders in API keys
    config.embeddings.api_key = substitute_env(&config.embeddings.api_key);
    for provider in config.llm.providers.values_mut() {
        provider.api_key = substitute_env(&provider.api_key);
    }
    if let Some(openai) = config.llm.providers.get_mut("openai") {
        if openai.api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                openai.api_key = key;
            }
        }
    }

    // Validate providers
    match config.embeddings.provider.as_str() {
        "ollama" | "openai" => {}
        other => bail!(
            "Unknown embeddings provider: '{}'. Must be ollama or openai.",
            other
        ),
    }
    match config.vector_index.provider.as_str() {
        "qdrant" | "jsonl" => {}
        other => bail!(
            "Unknown vector index provider: '{}'. Must be qdrant or jsonl.",
            other
        ),
    }
    match config.graph.provider.as_str() {
        "neo4j" | "memory" => {}
        other => bail!(
            "Unknown graph provider: '{}'. Must be neo4j or memory.",
            other
        ),
    }
    let llm_provider = config.llm.provider.as_str();
    match llm_provider {
        "ollama" | "openai" => {}
        other => bail!("Unknown LLM provider: '{}'. Must be ollama or openai.", other),
    }
    let provider_cfg = config
        .llm
        .providers
        .get(llm_provider)
        .with_context(|| format!("[llm.providers.{}] section missing", llm_provider))?;
    if !provider_cfg.enabled {
        bail!("LLM provider '{}' is not enabled", llm_provider);
    }

    // Validate numeric knobs
    if config.vector_index.vector_size == 0 {
        bail!("vector_index.vector_size must be > 0");
    }
    if config.graph.similarity_anchors == 0 {
        bail!("graph.similarity_anchors must be > 0");
    }
    if config.llm.inference_batch_size == 0 {
        bail!("llm.inference_batch_size must be > 0");
    }
    if config.llm.llm_concurrency == 0 {
        bail!("llm.llm_concurrency must be > 0");
    }
    if !(0.0..=1.0).contains(&config.inference.min_confidence) {
        bail!("inference.min_confidence must be in [0.0, 1.0]");
    }

    // Validate stage names
    for stage in &config.ingestion.stages {
        if !STAGES.contains(&stage.as_str()) {
            bail!(
                "Unknown ingestion stage: '{}'. Available: {}",
                stage,
                STAGES.join(", ")
            );
        }
    }

    Ok(config)
}

/// Replace a `${ENV_VAR}` placeholder with the variable's value. Leaves the
/// string untouched when it is not a placeholder or the variable is unset.
fn substitute_env(value: &str) -> String {
    if let Some(name) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        if let Ok(resolved) = std::env::var(name) {
            return resolved;
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
[embeddings]
provider = "ollama"
model = "nomic-embed-text"
endpoint = "http://localhost:11434/api/embeddings"

[vector_index]
provider = "jsonl"
vector_size = 768

[graph]
provider = "memory"

[llm]
provider = "ollama"

[llm.providers.ollama]
enabled = true
endpoint = "http://localhost:11434/api/chat"
model = "llama3"
"#
        .to_string()
    }

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pgraph.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_minimal_config_loads_with_defaults() {
        let (_dir, path) = write_config(&minimal_toml());
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.graph.similarity_anchors, 5);
        assert_eq!(cfg.llm.inference_batch_size, 10);
        assert_eq!(cfg.inference.min_confidence, 0.0);
        assert!(cfg.ingestion.stages.is_empty());
    }

    #[test]
    fn test_unknown_stage_rejected() {
        let toml = format!("{}\n[ingestion]\nstages = [\"chunking\"]\n", minimal_toml());
        let (_dir, path) = write_config(&toml);
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Unknown ingestion stage"));
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("PGRAPH_TEST_KEY", "sk-resolved");
        let toml = minimal_toml().replace(
            "model = \"llama3\"",
            "model = \"llama3\"\napi_key = \"${PGRAPH_TEST_KEY}\"",
        );
        let (_dir, path) = write_config(&toml);
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.llm.providers["ollama"].api_key, "sk-resolved");
    }

    #[test]
    fn test_disabled_provider_rejected() {
        let toml = minimal_toml().replace("enabled = true", "enabled = false");
        let (_dir, path) = write_config(&toml);
        assert!(load_config(&path).is_err());
    }
}
