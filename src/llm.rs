//! Language-understanding backend.
//!
//! The pipeline treats the backend as a narrow capability: given a prompt,
//! return structured text. It is fallible and non-deterministic, so every
//! reply is re-validated downstream; nothing here is trusted as executable
//! structure.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait LanguageBackend: Send + Sync {
    /// One completion call. Implementations must bound their own wall-clock
    /// time and surface failures as `BackendUnavailable`.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Self {
        Self {
            api_key,
            base_url,
            model,
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LanguageBackend for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a precise JSON-only responder. Always return valid JSON, no other text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 1000
        });

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                AssistantError::BackendUnavailable(format!(
                    "no response within {} ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| AssistantError::BackendUnavailable(format!("API call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistantError::BackendUnavailable(format!("failed to parse response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AssistantError::BackendUnavailable("no content in response".to_string()))?;

        debug!(chars = content.len(), "backend completion received");
        Ok(content.to_string())
    }
}

/// Strip the markdown fences models sometimes wrap around JSON replies.
pub fn strip_code_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
