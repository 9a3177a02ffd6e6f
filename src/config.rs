//! Configuration parsing and validation.
//!
//! Control Mapper is configured via a TOML file (default:
//! `config/cmap.toml`). Every section is optional; omitted sections take
//! the defaults below.
//!
//! # Example Configuration
//!
//! ```toml
//! [scan]
//! root = "."
//! exclude_globs = ["**/generated/**"]
//! hints_file = "config/hints.toml"
//!
//! [index]
//! output_dir = ".cmap"
//!
//! [embedding]
//! provider = "openai"         # "disabled" | "openai" | "ollama" | "local"
//! model = "text-embedding-3-small"
//! dims = 1536
//! batch_size = 64
//!
//! [llm]
//! provider = "openai"         # "disabled" | "openai" | "ollama"
//! model = "gpt-4o-mini"
//!
//! [retrieval]
//! top_k = 5
//!
//! [generation]
//! max_attempts = 3
//! evidence_char_budget = 800
//! concurrency = 4
//!
//! [summaries]
//! enabled = false
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub summaries: SummariesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// TOML hint table (`[controls."SC-8"] generic = [...]`).
    #[serde(default)]
    pub hints_file: Option<PathBuf>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            exclude_globs: Vec::new(),
            hints_file: None,
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_max_file_bytes() -> u64 {
    1_000_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".cmap")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Chat completions base URL. Defaults per provider.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: None,
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// The chat completions base URL actually used.
    pub fn resolved_base_url(&self) -> String {
        match (&self.base_url, self.provider.as_str()) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, "ollama") => "http://localhost:11434/v1".to_string(),
            (None, _) => "https://api.openai.com/v1".to_string(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_evidence_char_budget")]
    pub evidence_char_budget: usize,
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            evidence_char_budget: default_evidence_char_budget(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_evidence_char_budget() -> usize {
    800
}
fn default_rate_limit_backoff_ms() -> u64 {
    2_000
}
fn default_max_rate_limit_retries() -> u32 {
    5
}
fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummariesConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,
}

impl Default for SummariesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_file_chars: default_max_file_chars(),
        }
    }
}

fn default_max_file_chars() -> usize {
    12_000
}

/// Parse and validate a configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate_config(config: &Config) -> Result<()> {
    // Retrieval and generation
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.generation.max_attempts == 0 {
        bail!("generation.max_attempts must be >= 1");
    }
    if config.generation.concurrency == 0 {
        bail!("generation.concurrency must be >= 1");
    }
    if config.generation.evidence_char_budget == 0 {
        bail!("generation.evidence_char_budget must be > 0");
    }

    // Embedding
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // LLM
    match config.llm.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.llm.model.is_none() {
                bail!(
                    "llm.model must be specified when provider is '{}'",
                    config.llm.provider
                );
            }
        }
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.summaries.enabled && !config.llm.is_enabled() {
        bail!("summaries.enabled requires an llm provider");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.scan.root, PathBuf::from("."));
        assert_eq!(config.index.output_dir, PathBuf::from(".cmap"));
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.generation.max_attempts, 3);
        assert_eq!(config.generation.evidence_char_budget, 800);
        assert!(!config.embedding.is_enabled());
        assert!(!config.llm.is_enabled());
        assert!(!config.summaries.enabled);
    }

    #[test]
    fn test_openai_embedding_requires_dims() {
        let err = parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_providers_rejected() {
        assert!(parse_config("[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[llm]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_llm_requires_model() {
        let err = parse_config("[llm]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("llm.model"));
    }

    #[test]
    fn test_summaries_need_llm() {
        assert!(parse_config("[summaries]\nenabled = true\n").is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(parse_config("[retrieval]\ntop_k = 0\n").is_err());
        assert!(parse_config("[generation]\nmax_attempts = 0\n").is_err());
        assert!(parse_config("[generation]\nconcurrency = 0\n").is_err());
    }

    #[test]
    fn test_base_url_defaults() {
        let mut llm = LlmConfig::default();
        llm.provider = "ollama".to_string();
        assert_eq!(llm.resolved_base_url(), "http://localhost:11434/v1");
        llm.provider = "openai".to_string();
        assert_eq!(llm.resolved_base_url(), "https://api.openai.com/v1");
        llm.base_url = Some("http://proxy:8080/v1/".to_string());
        assert_eq!(llm.resolved_base_url(), "http://proxy:8080/v1");
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/cmap.example.toml")).unwrap();
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(
            config.scan.hints_file,
            Some(PathBuf::from("config/hints.toml"))
        );
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cmap.toml");
        std::fs::write(&path, "[retrieval]\ntop_k = 2\n").unwrap();
        assert_eq!(load_config(&path).unwrap().retrieval.top_k, 2);
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
