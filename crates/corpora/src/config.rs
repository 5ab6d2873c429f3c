//! TOML configuration parsing and validation.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use corpora_core::error::{EngineError, Result};
use corpora_core::hybrid::HybridWeights;
use corpora_core::rank::RankWeights;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

fn default_overlap() -> usize {
    0
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_final_limit")]
    pub limit: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f64,
    #[serde(default = "default_usage_weight")]
    pub usage_weight: f64,
    #[serde(default = "default_metadata_weight")]
    pub metadata_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            limit: default_final_limit(),
            candidate_k: default_candidate_k(),
            similarity_weight: default_similarity_weight(),
            usage_weight: default_usage_weight(),
            metadata_weight: default_metadata_weight(),
        }
    }
}

impl RetrievalConfig {
    pub fn rank_weights(&self) -> RankWeights {
        RankWeights {
            similarity: self.similarity_weight,
            usage: self.usage_weight,
            metadata: self.metadata_weight,
        }
    }
}

fn default_threshold() -> f64 {
    0.0
}
fn default_candidate_k() -> usize {
    80
}
fn default_final_limit() -> usize {
    10
}
fn default_similarity_weight() -> f64 {
    0.6
}
fn default_usage_weight() -> f64 {
    0.3
}
fn default_metadata_weight() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct HybridConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            text_weight: default_text_weight(),
        }
    }
}

impl HybridConfig {
    pub fn weights(&self) -> HybridWeights {
        HybridWeights {
            semantic: self.semantic_weight,
            text: self.text_weight,
        }
    }
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_text_weight() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_length_tolerance")]
    pub length_tolerance: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            length_tolerance: default_length_tolerance(),
        }
    }
}

fn default_length_tolerance() -> f64 {
    corpora_core::dedup::DEFAULT_LENGTH_TOLERANCE
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
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
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

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn bad_config(msg: impl Into<String>) -> EngineError {
    EngineError::Configuration(msg.into())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| bad_config(format!("failed to read config file {}: {e}", path.display())))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| bad_config(format!("failed to parse config file: {e}")))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        return Err(bad_config("chunking.max_tokens must be > 0"));
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        return Err(bad_config(
            "chunking.overlap_tokens must be < chunking.max_tokens",
        ));
    }

    if config.retrieval.limit < 1 {
        return Err(bad_config("retrieval.limit must be >= 1"));
    }
    if !(0.0..=1.0).contains(&config.retrieval.threshold) {
        return Err(bad_config("retrieval.threshold must be in [0.0, 1.0]"));
    }
    config.retrieval.rank_weights().validate()?;
    config.hybrid.weights().validate()?;

    if !(0.0..1.0).contains(&config.dedup.length_tolerance) {
        return Err(bad_config("dedup.length_tolerance must be in [0.0, 1.0)"));
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            return Err(bad_config(format!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            )));
        }
        if config.embedding.model.is_none() {
            return Err(bad_config(format!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            )));
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => Ok(()),
        other => Err(bad_config(format!(
            "unknown embedding provider: '{other}'. Must be disabled or openai."
        ))),
    }
}
