//! Language-model provider implementations.
//!
//! Each provider implements the core [`LanguageModel`] trait with a single
//! non-streaming completion call:
//! - **[`DisabledModel`]**: returns errors; used when no model is configured.
//! - **[`OpenAIChatModel`]**: `POST /v1/chat/completions` with one user message.
//! - **[`OllamaModel`]**: `POST /api/generate` with `stream: false`.
//!
//! Failures are reported as [`QaError::LanguageModel`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use qa_harness_core::llm::{CompletionRequest, LanguageModel};
use qa_harness_core::QaError;

use crate::config::LlmConfig;
use crate::http;

/// A no-op model that always fails.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _request: &CompletionRequest) -> qa_harness_core::Result<String> {
        Err(QaError::language_model(
            "language model",
            "language model provider is disabled; set [llm] provider in the config",
        ))
    }
}

/// Chat-completions model on the OpenAI API (or a compatible server via `llm.url`).
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIChatModel {
    model: String,
    api_key: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            model,
            api_key,
            url: format!("{}/v1/chat/completions", base.trim_end_matches('/')),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> qa_harness_core::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        });
        http::post_json(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await
        .and_then(|json| parse_chat_response(&json))
        .map_err(|e| QaError::language_model(format!("OpenAI model {}", self.model), format!("{:#}", e)))
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

/// Completion model served by a local Ollama instance.
pub struct OllamaModel {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model,
            url,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> qa_harness_core::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_output_tokens,
            },
        });
        http::post_json(
            &self.client,
            &format!("{}/api/generate", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await
        .and_then(|json| parse_generate_response(&json))
        .map_err(|e| QaError::language_model(format!("Ollama model {}", self.model), format!("{:#}", e)))
    }
}

fn parse_generate_response(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
}

/// Create the appropriate [`LanguageModel`] based on configuration.
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
