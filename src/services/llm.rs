//! LLM provider client
//!
//! Provides `generate(prompt) -> text` for instruction and variant
//! generation during evolution. Failures surface as typed errors; retry
//! policy belongs to the task coordinator, not this client.

use crate::error::{MetanoiaError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::debug;

/// Options for a single generation request
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

/// LLM provider trait; `generate(prompt, options) -> text` per the
/// collaborator contract
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String>;
}

/// Configuration for the LLM client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Anthropic API key
    pub api_key: String,

    /// Model to use
    pub model: String,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            model: "claude-3-5-haiku-20241022".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Anthropic messages API client
pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    text: String,
}

impl LlmClient {
    /// Create a new LLM client with custom config
    pub fn new(config: LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(MetanoiaError::Validation(
                "ANTHROPIC_API_KEY not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self { config, client })
    }

    /// Create with default config
    pub fn with_default() -> Result<Self> {
        Self::new(LlmConfig::default())
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        debug!("Generating with model {}", self.config.model);

        let request = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MetanoiaError::Llm(format!(
                "API returned {}: {}",
                status, body
            )));
        }

        let parsed: MessagesResponse = response.json().await?;
        parsed
            .content
            .first()
            .map(|c| c.text.clone())
            .ok_or_else(|| MetanoiaError::Llm("empty response content".to_string()))
    }
}
