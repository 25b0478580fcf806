//! TOML configuration.
//!
//! Every section is optional; a missing file section takes the defaults
//! below. [`load_config`] parses and validates in one step.
//!
//! ```toml
//! [index]
//! dir = "./data/index"
//!
//! [chunking]
//! size = 800
//! overlap = 100
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use qa_harness_core::chunk::ChunkParams;
use qa_harness_core::llm::GenerationOptions;
use qa_harness_core::script::ScriptOptions;

use crate::selectors::CollisionPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub selectors: SelectorsConfig,
    #[serde(default)]
    pub script: ScriptConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    /// Published versions kept on disk, including the current one.
    #[serde(default = "default_keep_versions")]
    pub keep_versions: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            keep_versions: default_keep_versions(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/index")
}
fn default_keep_versions() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
    #[serde(default)]
    pub lookback: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
            lookback: None,
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> Result<ChunkParams> {
        let params = ChunkParams::new(self.size, self.overlap)?;
        Ok(match self.lookback {
            Some(lookback) => params.with_lookback(lookback),
            None => params,
        })
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound for one retrieve-and-generate or script request.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            timeout_secs: default_request_timeout(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_request_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_disabled() -> String {
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
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            temperature: 0.0,
            max_output_tokens: default_max_output_tokens(),
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn generation(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

fn default_max_output_tokens() -> u32 {
    4096
}
fn default_llm_retries() -> u32 {
    2
}
fn default_llm_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SelectorsConfig {
    #[serde(default)]
    pub collision: CollisionPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScriptConfig {
    #[serde(default = "default_framework")]
    pub framework: String,
    /// Include the cited chunk texts in the script prompt.
    #[serde(default = "default_true")]
    pub include_evidence: bool,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            framework: default_framework(),
            include_evidence: true,
        }
    }
}

fn default_framework() -> String {
    "selenium-python".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    /// Directory of support documents scanned by `qah build`.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Markup page the selector map is extracted from.
    #[serde(default)]
    pub markup: Option<PathBuf>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            root: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            markup: None,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.md", "**/*.txt", "**/*.json", "**/*.pdf", "**/*.html"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    pub fn script_options(&self) -> ScriptOptions {
        ScriptOptions {
            framework: self.script.framework.clone(),
            generation: self.llm.generation(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    from_toml_str(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate configuration text.
pub fn from_toml_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.size == 0 {
        bail!("chunking.size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.size {
        bail!(
            "chunking.overlap ({}) must be smaller than chunking.size ({})",
            config.chunking.overlap,
            config.chunking.size
        );
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.timeout_secs == 0 {
        bail!("retrieval.timeout_secs must be > 0");
    }

    if config.index.keep_versions == 0 {
        bail!("index.keep_versions must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "local" => {}
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
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    // Validate language model
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
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.max_output_tokens == 0 {
        bail!("llm.max_output_tokens must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = from_toml_str("").unwrap();
        assert_eq!(config.chunking.size, 800);
        assert_eq!(config.chunking.overlap, 100);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.index.dir, PathBuf::from("./data/index"));
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.llm.max_output_tokens, 4096);
        assert_eq!(config.selectors.collision, CollisionPolicy::FirstWins);
        assert!(config.script.include_evidence);
        assert_eq!(config.chunking.params().unwrap().lookback(), 160);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = from_toml_str("[chunking]\nsize = 100\noverlap = 100\n").unwrap_err();
        assert!(format!("{:#}", err).contains("overlap"));
    }

    #[test]
    fn test_network_embedding_requires_model_and_dims() {
        assert!(from_toml_str("[embedding]\nprovider = \"openai\"\ndims = 1536\n").is_err());
        assert!(from_toml_str("[embedding]\nprovider = \"ollama\"\nmodel = \"m\"\n").is_err());
        assert!(from_toml_str(
            "[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n"
        )
        .is_ok());
    }

    #[test]
    fn test_unknown_providers_rejected() {
        assert!(from_toml_str("[embedding]\nprovider = \"gemini\"\n").is_err());
        assert!(from_toml_str("[llm]\nprovider = \"gemini\"\n").is_err());
        assert!(from_toml_str("[llm]\nprovider = \"openai\"\n").is_err());
    }

    #[test]
    fn test_collision_policy_parses() {
        let config = from_toml_str("[selectors]\ncollision = \"last_wins\"\n").unwrap();
        assert_eq!(config.selectors.collision, CollisionPolicy::LastWins);
        assert!(from_toml_str("[selectors]\ncollision = \"random\"\n").is_err());
    }

    #[test]
    fn test_temperature_range() {
        assert!(from_toml_str("[llm]\ntemperature = 3.5\n").is_err());
    }
}
