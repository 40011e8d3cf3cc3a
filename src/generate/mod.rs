//! Model provider abstraction for different LLM APIs
//!
//! Supports:
//! - Ollama (local models)
//! - OpenAI (GPT models)
//!
//! Raw providers return whatever the API produced; [`policy::generate_checked`]
//! adds the timeout, retry and empty-completion handling the pipeline relies on.
//!
//! # Examples
//!
//! ## Using Ollama Provider
//!
//! ```no_run
//! use litmine::generate::{create_provider, ModelProvider};
//! use litmine::config::{ModelConfig, ModelProvider as ProviderType};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ModelConfig {
//!     provider: ProviderType::Ollama,
//!     url: "http://localhost:11434".to_string(),
//!     model: "qwen3:8b".to_string(),
//!     api_key: None,
//!     temperature: 0.7,
//!     top_p: 0.9,
//!     max_tokens: Some(256),
//! };
//!
//! let provider = create_provider(config)?;
//! provider.validate_connection().await?;
//! let response = provider.generate("Hello, world!").await?;
//! println!("Response: {}", response.content);
//! # Ok(())
//! # }
//! ```
//!
//! ## Using OpenAI Provider
//!
//! ```no_run
//! use litmine::generate::create_provider;
//! use litmine::config::{ModelConfig, ModelProvider as ProviderType};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Set API key in environment: export OPENAI_API_KEY=sk-...
//! let config = ModelConfig {
//!     provider: ProviderType::OpenAI,
//!     url: "https://api.openai.com/v1".to_string(),
//!     model: "gpt-4o-mini".to_string(),
//!     api_key: Some("OPENAI_API_KEY".to_string()), // References env var
//!     temperature: 0.7,
//!     top_p: 0.9,
//!     max_tokens: Some(256),
//! };
//!
//! let provider = create_provider(config)?;
//! let response = provider.generate("Summarize this paper").await?;
//! # Ok(())
//! # }
//! ```

pub mod policy;

pub use policy::generate_checked;

use crate::config::{ModelConfig, ModelProvider as ProviderType};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Errors from policy-checked generation
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Model '{model}' returned an empty completion")]
    EmptyCompletion { model: String },

    #[error("Generation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        source: ProviderError,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Response from a model provider
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub content: String,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Model provider trait
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Generate a completion
    async fn generate(&self, prompt: &str) -> Result<ProviderResponse, ProviderError>;

    /// Validate connection to the provider
    async fn validate_connection(&self) -> Result<(), ProviderError>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the provider type
    fn provider_type(&self) -> ProviderType;
}

/// Create a model provider from configuration
pub fn create_provider(config: ModelConfig) -> Result<Box<dyn ModelProvider>, ProviderError> {
    match config.provider {
        ProviderType::Ollama => Ok(Box::new(OllamaProvider::new(config))),
        ProviderType::OpenAI => Ok(Box::new(OpenAIProvider::new(config)?)),
    }
}

// ============================================================================
// Ollama Provider
// ============================================================================

pub struct OllamaProvider {
    config: ModelConfig,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: ModelConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    model: String,
    response: String,
    done: bool,
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    async fn generate(&self, prompt: &str) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/api/generate", self.config.url);

        let request = OllamaRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: Some(OllamaOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                num_predict: self.config.max_tokens,
            }),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::ModelError(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await?
            )));
        }

        let ollama_response: OllamaResponse = response.json().await?;

        Ok(ProviderResponse {
            content: ollama_response.response,
            model: ollama_response.model,
            finish_reason: Some(if ollama_response.done { "stop" } else { "length" }.to_string()),
        })
    }

    async fn validate_connection(&self) -> Result<(), ProviderError> {
        let url = format!("{}/api/tags", self.config.url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::ConnectionError(format!(
                "Failed to connect to Ollama at {}",
                self.config.url
            )));
        }

        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Ollama
    }
}

// ============================================================================
// OpenAI Provider
// ============================================================================

pub struct OpenAIProvider {
    config: ModelConfig,
    client: Client,
    api_key: String,
}

impl OpenAIProvider {
    pub fn new(config: ModelConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| ProviderError::AuthError("OpenAI API key not found".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Ok(Self {
            config,
            client,
            api_key,
        })
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    model: String,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: String,
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    async fn generate(&self, prompt: &str) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.config.url);

        let request = OpenAIRequest {
            model: self.config.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::ModelError(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await?
            )));
        }

        let openai_response: OpenAIResponse = response.json().await?;

        let choice = openai_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

        Ok(ProviderResponse {
            content: choice.message.content,
            model: openai_response.model,
            finish_reason: choice.finish_reason,
        })
    }

    async fn validate_connection(&self) -> Result<(), ProviderError> {
        let url = format!("{}/models", self.config.url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        if response.status() == 401 {
            return Err(ProviderError::AuthError("Invalid API key".to_string()));
        }

        if !response.status().is_success() {
            return Err(ProviderError::ConnectionError(format!(
                "Failed to connect to OpenAI: HTTP {}",
                response.status()
            )));
        }

        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_provider_creation() {
        let config = ModelConfig::default();
        let provider = OllamaProvider::new(config);
        assert_eq!(provider.model_name(), "qwen3:8b");
        assert_eq!(provider.provider_type(), ProviderType::Ollama);
    }

    #[test]
    fn test_create_provider() {
        let config = ModelConfig::default();
        let provider = create_provider(config).unwrap();
        assert_eq!(provider.provider_type(), ProviderType::Ollama);
    }

    #[test]
    fn test_openai_requires_resolvable_key() {
        let mut config = ModelConfig::default();
        config.provider = ProviderType::OpenAI;
        config.api_key = Some("LITMINE_TEST_MISSING_KEY_VAR".to_string());

        // Env var does not exist, so the key cannot be resolved
        assert!(matches!(
            OpenAIProvider::new(config),
            Err(ProviderError::AuthError(_))
        ));
    }
}
