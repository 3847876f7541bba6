use super::{Completion, LLMError, LLMProvider, Message, MessageRole, Pricing};
use crate::config::AnthropicConfig;
use async_trait::async_trait;
use serde_json::json;

pub struct AnthropicProvider {
    config: AnthropicConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig, api_key: Option<String>) -> Self {
        Self {
            config,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Read the key from `ANTHROPIC_API_KEY`
    pub fn from_env(config: AnthropicConfig) -> Self {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        Self::new(config, api_key)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
            LLMError::AuthenticationFailed("ANTHROPIC_API_KEY is not set".to_string())
        })?;

        let url = format!("{}/messages", self.config.base_url);

        // System turns travel in a separate field; the rest keep their order
        let mut system_prompt = String::new();
        let mut api_messages = Vec::new();
        for msg in messages {
            if msg.role == MessageRole::System {
                system_prompt.push_str(&msg.content);
                system_prompt.push('\n');
                continue;
            }
            api_messages.push(json!({
                "role": msg.role.to_string(),
                "content": msg.content
            }));
        }

        let payload = json!({
            "model": model,
            "max_tokens": max_tokens,
            "system": system_prompt.trim_end(),
            "messages": api_messages,
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
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

        let content_arr = data
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| LLMError::ParseError("No content array in response".to_string()))?;

        let mut full_content = String::new();
        for item in content_arr {
            if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                full_content.push_str(text);
            }
        }

        let usage = data.get("usage");
        let prompt_tokens = usage
            .and_then(|u| u.get("input_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or_else(|| super::estimate_prompt_tokens(messages));
        let completion_tokens = usage
            .and_then(|u| u.get("output_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or_else(|| super::estimate_tokens(&full_content));

        Ok(Completion {
            text: full_content,
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
        })
    }
}
