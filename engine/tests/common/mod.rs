//! Fixtures shared by the integration tests

#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use hive_engine::config::Config;
use hive_engine::llm::{Completion, LLMError, LLMProvider, Message, Pricing, Result};
use parking_lot::Mutex;

type Responder = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Provider answering from a closure over the last prompt. Prompts containing
/// `stall_on` never answer.
pub struct ScriptedProvider {
    respond: Box<Responder>,
    stall_on: Option<&'static str>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(respond: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            stall_on: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn campaign() -> Self {
        Self::new(|prompt| Ok(campaign_reply(prompt).to_string()))
    }

    pub fn stalling_on(mut self, marker: &'static str) -> Self {
        self.stall_on = Some(marker);
        self
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn default_model(&self) -> &str {
        "script-1"
    }

    fn pricing(&self) -> Pricing {
        Pricing::new(0.001, 0.002)
    }

    async fn invoke(&self, model: &str, messages: &[Message], _max_tokens: u32) -> Result<Completion> {
        let prompt = messages
            .last()
            .map(|m| m.content.clone())
            .ok_or_else(|| LLMError::InvalidRequest("no messages".to_string()))?;
        self.prompts.lock().push(prompt.clone());

        if self.stall_on.is_some_and(|marker| prompt.contains(marker)) {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        }

        Ok(Completion {
            text: (self.respond)(&prompt)?,
            model: model.to_string(),
            prompt_tokens: 100,
            completion_tokens: 50,
        })
    }
}

/// Canned answer for each bee prompt
pub fn campaign_reply(prompt: &str) -> &'static str {
    if prompt.contains("Write ad copy") {
        r#"{"headline": "Upgrade today", "body": "Smart picks for smart homes.", "cta": "Shop now", "tone": "energetic"}"#
    } else if prompt.contains("campaign strategy") {
        r#"{"campaign_name": "Researcher Spring Push", "objective": "conversions", "duration_days": 14}"#
    } else if prompt.contains("classify") {
        r#"{"segment": "researcher", "confidence": 0.82, "reasoning": "Many page views per session"}"#
    } else if prompt.contains("predict") {
        r#"{"interests": ["Smart Home", "Electronics", "Books"], "reasoning": "Browsing history"}"#
    } else {
        "{}"
    }
}

/// In-memory hive configuration with the hashing embedder and a rate limit
/// high enough for several concurrent runs
pub fn memory_config() -> Config {
    let mut config = Config::default();
    config.core.persistence = "memory".to_string();
    config.rate_limit.max_requests = 100;
    config
}
