//! Client for OpenAI-compatible chat completion endpoints.
//!
//! Covers aggregators (OpenRouter, Together, Groq) and on-prem servers that
//! speak the same protocol (vLLM, TGI, llama.cpp). Structured output is
//! requested through `response_format: json_schema`.

use crate::client::model::parse_json_text;
use crate::client::{ModelClient, Schema};
use crate::models::{ModelConfig, Result, SensemakeError};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Longest `json_schema.name` the chat completions API accepts.
const MAX_SCHEMA_NAME_LEN: usize = 64;

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    stream: bool,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Model client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatModel {
    client: reqwest::Client,
    /// Name of this endpoint (for logging)
    name: String,
    /// Base URL for the API
    base_url: String,
    /// Model identifier sent with every request
    model_id: String,
    /// Auth and custom headers sent with every request
    headers: HeaderMap,
    temperature: f64,
    max_tokens: Option<u32>,
    timeout: Duration,
    batch_size: usize,
    // Usage tracking
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
}

impl OpenAiCompatModel {
    /// Create a client from model configuration and a resolved API key.
    pub fn new(config: &ModelConfig, api_key: Option<String>) -> Result<Self> {
        let timeout = config.timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SensemakeError::Network)?;

        Ok(Self {
            client,
            name: format!("openai:{}", config.model_id),
            headers: config.request_headers(api_key.as_deref())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_id: config.model_id.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
            batch_size: config.categorization_batch_size,
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get total tokens tracked as (input, output).
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }

    /// `response_format` directive for a schema.
    ///
    /// The name is limited to `[A-Za-z0-9_-]` and `MAX_SCHEMA_NAME_LEN` chars.
    fn response_format(schema: &Schema) -> Value {
        let name: String = schema
            .name()
            .chars()
            .take(MAX_SCHEMA_NAME_LEN)
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        json!({
            "type": "json_schema",
            "json_schema": {
                "name": name,
                "schema": schema.to_directive(),
                "strict": false,
            }
        })
    }

    /// Send one chat completion request and return the message content.
    async fn complete(&self, prompt: &str, response_format: Option<Value>) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model_id,
            messages: vec![Message::user(prompt)],
            stream: false,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(endpoint = %self.name, structured = request.response_format.is_some(), "Sending completion request");

        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SensemakeError::Timeout(self.timeout)
                } else {
                    SensemakeError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiErrorResponse>(&error_body) {
                Ok(api_error) => api_error.error.message,
                Err(_) if error_body.trim().is_empty() => status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
                Err(_) => error_body,
            };
            return Err(SensemakeError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let body_text = response.text().await.map_err(SensemakeError::Network)?;
        let body: ChatCompletionResponse = serde_json::from_str(&body_text).map_err(|e| {
            SensemakeError::parse(format!("Failed to parse completion envelope: {e}"), &body_text)
        })?;

        if let Some(usage) = &body.usage {
            self.total_input_tokens
                .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
            self.total_output_tokens
                .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        }

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SensemakeError::parse("No content in response", body_text))
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn categorization_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        self.complete(prompt, None).await
    }

    async fn generate_structured_data(&self, prompt: &str, schema: &Schema) -> Result<Value> {
        let text = self
            .complete(prompt, Some(Self::response_format(schema)))
            .await?;
        parse_json_text(&text)
    }
}
