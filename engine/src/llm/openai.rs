//! OpenAI chat-completions provider

use super::{Completion, LLMError, LLMProvider, Message, Pricing};
use crate::config::OpenAIConfig;
use async_trait::async_trait;
use serde_json::json;

pub struct OpenAIProvider {
    config: OpenAIConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig, api_key: Option<String>) -> Self {
        Self {
            config,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Read the key from `OPENAI_API_KEY`
    pub fn from_env(config: OpenAIConfig) -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        Self::new(config, api_key)
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_local(&self) -> bool {
        false
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    fn pricing(&self) -> Pricing {
        Pricing::new(
            self.config.prompt_cost_per_1k,
            self.config.completion_cost_per_1k,
        )
    }

    async fn check_health(&self) -> bool {
        self.api_key.is_some()
    }

    async fn invoke(
        &self,
        model: &str,
        messages: &[Message],
        max_tokens: u32,
    ) -> super::Result<Completion> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            LLMError::AuthenticationFailed("OPENAI_API_KEY is not set".to_string())
        })?;

        let url = format!("{}/chat/completions", self.config.base_url);

        let api_messages: Vec<_> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                })
            })
            .collect();

        let payload = json!({
            "model": model,
            "messages": api_messages,
            "max_tokens": max_tokens,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| LLMError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(LLMError::from_status(status, text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let content = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LLMError::ParseError("No message content in response".to_string()))?;

        let usage = data.get("usage");
        let prompt_tokens = usage
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or_else(|| super::estimate_prompt_tokens(messages));
        let completion_tokens = usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or_else(|| super::estimate_tokens(content));

        Ok(Completion {
            text: content.to_string(),
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
        })
    }
}
