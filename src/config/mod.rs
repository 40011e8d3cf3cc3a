//! Configuration system for Litmine
//!
//! Supports loading configuration from:
//! 1. CLI --config argument
//! 2. ~/.config/litmine/config.{LITMINE_ENV}.json
//! 3. Default values
//!
//! Where LITMINE_ENV can be: production (default), development, test
//!
//! # Examples
//!
//! ## Loading Configuration
//!
//! ```no_run
//! use litmine::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load with default priority
//! let config = AppConfig::load(None)?;
//! println!("Generator: {} via {}", config.generator.model, config.generator.provider);
//!
//! // Load from specific file
//! let config = AppConfig::load(Some("./my-config.json".as_ref()))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Creating Configuration
//!
//! ```
//! use litmine::config::{AppConfig, ModelProvider};
//!
//! let mut config = AppConfig::default();
//! config.generator.provider = ModelProvider::OpenAI;
//! config.generator.model = "gpt-4o-mini".to_string();
//! config.generator.api_key = Some("OPENAI_API_KEY".to_string());
//!
//! // Validate before using
//! config.validate().unwrap();
//! ```
//!
//! ## Environment Variables
//!
//! Environment variables override config file values:
//! - LITMINE_OLLAMA_URL
//! - LITMINE_MODEL
//! - LITMINE_RESULTS
//! - OPENAI_API_KEY

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Supported generation providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum ModelProvider {
    #[default]
    Ollama,
    OpenAI,
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAI => write!(f, "openai"),
        }
    }
}

impl std::str::FromStr for ModelProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(ConfigError::ValidationError(format!(
                "Unknown provider: {}",
                s
            ))),
        }
    }
}

/// Configuration for the generation model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider type
    pub provider: ModelProvider,

    /// API URL (for Ollama) or base URL
    #[serde(default = "default_ollama_url")]
    pub url: String,

    /// Model name
    pub model: String,

    /// API key (can be environment variable name like "OPENAI_API_KEY")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Temperature (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Top P sampling (0.0 - 1.0)
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<usize>,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.9
}

fn default_max_tokens() -> Option<usize> {
    Some(256)
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Ollama,
            url: default_ollama_url(),
            model: "qwen3:8b".to_string(),
            api_key: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl ModelConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "Temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            )));
        }

        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::ValidationError(format!(
                "Top P must be between 0.0 and 1.0, got {}",
                self.top_p
            )));
        }

        if self.url.is_empty() {
            return Err(ConfigError::ValidationError(
                "URL cannot be empty".to_string(),
            ));
        }

        if self.model.is_empty() {
            return Err(ConfigError::ValidationError(
                "Model name cannot be empty".to_string(),
            ));
        }

        // Non-Ollama providers need a key
        if self.provider != ModelProvider::Ollama && self.api_key.is_none() {
            return Err(ConfigError::ValidationError(format!(
                "API key required for {} provider",
                self.provider
            )));
        }

        Ok(())
    }

    /// Resolve API key from environment variable if needed
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.as_ref().and_then(|key| {
            // If the key looks like an env var name, try to resolve it
            if key.chars().all(|c| c.is_uppercase() || c == '_') {
                std::env::var(key).ok()
            } else {
                Some(key.clone())
            }
        })
    }
}

/// Supported embedding backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum EmbeddingBackend {
    /// FastEmbed AllMiniLM-L6-v2, local ONNX inference
    #[default]
    FastEmbed,
    /// Deterministic hashed character n-grams, no model download
    Ngram,
}

/// Configuration for the embedding model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    /// LRU cache capacity for computed embeddings
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// N-gram width for the ngram backend
    #[serde(default = "default_ngram_size")]
    pub ngram_size: usize,

    /// Vector dimension for the ngram backend
    #[serde(default = "default_ngram_dimension")]
    pub ngram_dimension: usize,
}

fn default_cache_size() -> usize {
    1000
}

fn default_ngram_size() -> usize {
    3
}

fn default_ngram_dimension() -> usize {
    256
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            cache_size: default_cache_size(),
            ngram_size: default_ngram_size(),
            ngram_dimension: default_ngram_dimension(),
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding cache_size must be greater than 0".to_string(),
            ));
        }
        if self.ngram_size == 0 {
            return Err(ConfigError::ValidationError(
                "ngram_size must be greater than 0".to_string(),
            ));
        }
        if self.ngram_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "ngram_dimension must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retrieval, chunking and evaluation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Passages retrieved per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Hypotheses requested from the proposer prompt
    #[serde(default = "default_max_hypotheses")]
    pub max_hypotheses: usize,

    /// Chunk size in characters
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,

    /// Overlap between consecutive chunks in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// A hypothesis is supported when its average similarity to context
    /// is greater than or equal to this threshold (equality counts).
    #[serde(default = "default_support_threshold")]
    pub support_threshold: f32,

    /// Same rule applied to the gap analysis text
    #[serde(default = "default_grounding_threshold")]
    pub grounding_threshold: f32,
}

fn default_top_k() -> usize {
    3
}

fn default_max_hypotheses() -> usize {
    2
}

fn default_chunk_max_chars() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_support_threshold() -> f32 {
    0.5
}

fn default_grounding_threshold() -> f32 {
    0.3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_hypotheses: default_max_hypotheses(),
            chunk_max_chars: default_chunk_max_chars(),
            chunk_overlap: default_chunk_overlap(),
            support_threshold: default_support_threshold(),
            grounding_threshold: default_grounding_threshold(),
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "top_k must be greater than 0".to_string(),
            ));
        }
        if self.max_hypotheses == 0 {
            return Err(ConfigError::ValidationError(
                "max_hypotheses must be greater than 0".to_string(),
            ));
        }
        if self.chunk_max_chars == 0 {
            return Err(ConfigError::ValidationError(
                "chunk_max_chars must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_max_chars {
            return Err(ConfigError::ValidationError(format!(
                "chunk_overlap ({}) must be smaller than chunk_max_chars ({})",
                self.chunk_overlap, self.chunk_max_chars
            )));
        }
        for (name, value) in [
            ("support_threshold", self.support_threshold),
            ("grounding_threshold", self.grounding_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be between -1.0 and 1.0, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Retry, backoff and timeout policy for generation calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationPolicy {
    /// Total attempts per generation call (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Base delay for exponential backoff between attempts
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Per-call timeout; an elapsed timeout counts as a failed attempt
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl GenerationPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation model configuration
    #[serde(default)]
    pub generator: ModelConfig,

    /// Embedding backend configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Retrieval and evaluation parameters
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Retry/timeout policy for generation calls
    #[serde(default)]
    pub generation: GenerationPolicy,

    /// Directory for persisted index blobs
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// Append-only results table
    #[serde(default = "default_results_path")]
    pub results_path: PathBuf,

    /// Experiment configurations run concurrently (1 = sequential)
    #[serde(default = "default_parallel")]
    pub parallel: usize,
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("indexes")
}

fn default_results_path() -> PathBuf {
    PathBuf::from("evaluation_results.csv")
}

fn default_parallel() -> usize {
    1
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            generator: ModelConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationPolicy::default(),
            index_dir: default_index_dir(),
            results_path: default_results_path(),
            parallel: default_parallel(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&content)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration with standard priority:
    /// 1. Explicit path
    /// 2. ~/.config/litmine/config.{LITMINE_ENV}.json
    /// 3. Defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            if path.exists() {
                tracing::info!("Loading config from: {:?}", path);
                return Self::from_file(path);
            } else {
                return Err(ConfigError::ValidationError(format!(
                    "Config file not found: {:?}",
                    path
                )));
            }
        }

        let env = std::env::var("LITMINE_ENV").unwrap_or_else(|_| "production".to_string());

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir
                .join("litmine")
                .join(format!("config.{}.json", env));

            if config_path.exists() {
                tracing::info!("Loading config from: {:?}", config_path);
                return Self::from_file(&config_path);
            }
        }

        tracing::info!("Using default configuration with environment overrides");
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("LITMINE_OLLAMA_URL") {
            if self.generator.provider == ModelProvider::Ollama {
                self.generator.url = url;
            }
        }

        if let Ok(model) = std::env::var("LITMINE_MODEL") {
            self.generator.model = model;
        }

        if let Ok(results) = std::env::var("LITMINE_RESULTS") {
            self.results_path = PathBuf::from(results);
        }

        // API keys are resolved on-demand via resolve_api_key()
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.generator.validate()?;
        self.embedding.validate()?;
        self.retrieval.validate()?;
        self.generation.validate()?;

        if self.parallel == 0 {
            return Err(ConfigError::ValidationError(
                "parallel must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("litmine"))
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
