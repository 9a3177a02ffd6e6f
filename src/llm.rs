//! Generative model client.
//!
//! One client covers every supported provider: OpenAI and Ollama both
//! expose an OpenAI-compatible `POST {base_url}/chat/completions` endpoint.
//! HTTP 429 is surfaced as [`ModelError::RateLimited`] (with the
//! `Retry-After` delay when the server sends one) so the orchestrator can
//! back off without spending a content attempt. Everything else is
//! [`ModelError::Failed`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::debug;

pub use control_mapper_core::model::{GenerativeModel, ModelError};

use crate::config::LlmConfig;

/// A model that refuses every call. Used when `llm.provider = "disabled"`.
pub struct DisabledModel;

#[async_trait]
impl GenerativeModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
        Err(ModelError::Failed("llm provider is disabled".to_string()))
    }
}

/// Chat completions client for OpenAI-compatible servers.
pub struct ChatModel {
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl ChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for provider '{}'", config.provider))?;
        let api_key = std::env::var(&config.api_key_env).ok();
        if config.provider == "openai" && api_key.is_none() {
            bail!("{} environment variable not set", config.api_key_env);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            base_url: config.resolved_base_url(),
            api_key,
            temperature: config.temperature,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl GenerativeModel for ChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| ModelError::Failed(format!("request to {} failed: {}", self.base_url, e)))?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            debug!(model = %self.model, ?retry_after, "chat completion rate limited");
            return Err(ModelError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ModelError::Failed(format!(
                "chat API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::Failed(format!("invalid chat response: {}", e)))?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, ModelError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ModelError::Failed("chat response missing choices[0].message.content".to_string()))
}

/// Create the configured [`GenerativeModel`].
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn GenerativeModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" | "ollama" => Ok(Arc::new(ChatModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"a\":1}"}}]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn test_parse_chat_response_missing_content() {
        let err = parse_chat_response(&serde_json::json!({"choices": []})).unwrap_err();
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_disabled_model_fails() {
        let model = create_model(&LlmConfig::default()).unwrap();
        assert_eq!(model.model_name(), "disabled");
        assert!(model.complete("hi").await.is_err());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            model: Some("llama3".to_string()),
            api_key_env: "CMAP_TEST_UNSET_KEY_VAR".to_string(),
            ..LlmConfig::default()
        };
        let model = ChatModel::new(&config).unwrap();
        assert_eq!(model.base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn test_openai_needs_key() {
        let config = LlmConfig {
            provider: "openai".to_string(),
            model: Some("gpt-4o-mini".to_string()),
            api_key_env: "CMAP_TEST_UNSET_KEY_VAR".to_string(),
            ..LlmConfig::default()
        };
        assert!(ChatModel::new(&config).is_err());
    }
}
