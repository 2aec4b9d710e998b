//! Client for the Ollama native generate API.
//!
//! One `POST /api/generate` per call with streaming disabled. Structured
//! output goes through the `format` field, which Ollama turns into a
//! grammar; the context window is set with `options.num_ctx`.

use crate::client::model::parse_json_text;
use crate::client::{ModelClient, Schema};
use crate::models::{ModelConfig, Result, SensemakeError};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaErrorResponse {
    error: String,
}

/// Model client for an Ollama server.
pub struct OllamaModel {
    client: reqwest::Client,
    name: String,
    base_url: String,
    model_id: String,
    headers: HeaderMap,
    num_ctx: Option<u32>,
    temperature: f64,
    max_tokens: Option<u32>,
    timeout: Duration,
    batch_size: usize,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
}

impl OllamaModel {
    /// Create a client from model configuration.
    ///
    /// Ollama has no auth of its own; a key is only sent when the server sits
    /// behind a proxy that wants one.
    pub fn new(config: &ModelConfig, api_key: Option<String>) -> Result<Self> {
        let timeout = config.timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SensemakeError::Network)?;

        let headers = config.request_headers(api_key.as_deref())?;

        Ok(Self {
            client,
            name: format!("ollama:{}", config.model_id),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_id: config.model_id.clone(),
            headers,
            num_ctx: config.num_ctx,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
            batch_size: config.categorization_batch_size,
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
        })
    }

    /// Get total tokens tracked as (prompt, generated).
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }

    fn options(&self) -> GenerateOptions {
        GenerateOptions {
            num_ctx: self.num_ctx,
            temperature: self.temperature,
            num_predict: self.max_tokens,
        }
    }

    async fn generate(&self, prompt: &str, format: Option<Value>) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model_id,
            prompt,
            stream: false,
            format,
            options: Some(self.options()),
        };

        let url = format!("{}/api/generate", self.base_url);
        debug!(endpoint = %self.name, structured = request.format.is_some(), "Sending generate request");

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
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<OllamaErrorResponse>(&body) {
                Ok(err) => err.error,
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
            };
            return Err(SensemakeError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let body_text = response.text().await.map_err(SensemakeError::Network)?;
        let body: GenerateResponse = serde_json::from_str(&body_text).map_err(|e| {
            SensemakeError::parse(format!("Failed to parse generate envelope: {e}"), &body_text)
        })?;

        self.total_input_tokens
            .fetch_add(body.prompt_eval_count.unwrap_or(0), Ordering::Relaxed);
        self.total_output_tokens
            .fetch_add(body.eval_count.unwrap_or(0), Ordering::Relaxed);

        Ok(body.response)
    }
}

#[async_trait]
impl ModelClient for OllamaModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn categorization_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        self.generate(prompt, None).await
    }

    async fn generate_structured_data(&self, prompt: &str, schema: &Schema) -> Result<Value> {
        let text = self.generate(prompt, Some(schema.to_directive())).await?;
        parse_json_text(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_unset_fields() {
        let request = GenerateRequest {
            model: "llama3.1",
            prompt: "hi",
            stream: false,
            format: None,
            options: Some(GenerateOptions {
                num_ctx: None,
                temperature: 0.0,
                num_predict: None,
            }),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "llama3.1",
                "prompt": "hi",
                "stream": false,
                "options": {"temperature": 0.0}
            })
        );
    }

    #[test]
    fn test_options_carry_context_window() {
        let config = ModelConfig {
            num_ctx: Some(8192),
            ..ModelConfig::default()
        };
        let model = OllamaModel::new(&config, None).unwrap();
        assert_eq!(model.options().num_ctx, Some(8192));
        assert_eq!(model.name(), "ollama:llama3.1");
        assert!(model.headers.get(reqwest::header::AUTHORIZATION).is_none());
    }
}
