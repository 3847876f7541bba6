//! Shared fixtures for unit tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ai::{AiEngine, EngineSettings, RateLimiter, ResourceLedger};
use crate::config::{KnowledgeConfig, LedgerConfig, RateLimitConfig};
use crate::knowledge::{HashingEmbedder, KnowledgeStore};
use crate::llm::{Completion, LLMProvider, Message, Pricing, Result};
use crate::memory::ConversationMemory;

type Responder = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Provider that answers from a closure over the final prompt
pub struct ScriptedProvider {
    respond: Box<Responder>,
    pub calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new(respond: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Canned answers for every bee prompt
    pub fn campaign() -> Self {
        Self::new(|prompt| Ok(campaign_reply(prompt).to_string()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

pub fn campaign_reply(prompt: &str) -> &'static str {
    if prompt.contains("Write ad copy") {
        r#"{"headline": "Upgrade today", "body": "Smart picks for smart homes.", "cta": "Shop now", "tone": "energetic"}"#
    } else if prompt.contains("campaign strategy") {
        r#"```json
{"campaign_name": "Researcher Spring Push", "objective": "conversions",
 "messaging_approach": "feature comparisons", "budget": {"daily": 50, "total": 700},
 "target_metrics": {"ctr": 0.03, "conversion_rate": 0.05, "roas": 3.5}, "duration_days": 14}
```"#
    } else if prompt.contains("classify") {
        r#"{"segment": "researcher", "confidence": 0.82, "reasoning": "Many page views per session", "characteristics": ["compares specs"]}"#
    } else if prompt.contains("predict") {
        r#"Here you go: {"interests": ["Smart Home", "Electronics", "Books", "Audio", "Gaming"], "reasoning": "Browsing history"}"#
    } else {
        "{}"
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
        self.calls.lock().push(messages.to_vec());
        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        let text = (self.respond)(prompt)?;
        Ok(Completion {
            text,
            model: model.to_string(),
            prompt_tokens: 100,
            completion_tokens: 50,
        })
    }
}

pub fn engine_with(provider: Arc<ScriptedProvider>, ledger: LedgerConfig) -> Arc<AiEngine> {
    Arc::new(AiEngine::new(
        provider,
        EngineSettings {
            model: None,
            max_tokens: 200,
            timeout: Duration::from_secs(5),
        },
        ResourceLedger::new(&ledger),
        RateLimiter::new(&RateLimitConfig {
            max_requests: 100,
            window_secs: 60,
        }),
        Arc::new(ConversationMemory::with_max_turns(10)),
    ))
}

pub fn engine(provider: Arc<ScriptedProvider>) -> Arc<AiEngine> {
    engine_with(provider, LedgerConfig::default())
}

pub fn knowledge() -> Arc<KnowledgeStore> {
    let config = KnowledgeConfig::default();
    Arc::new(KnowledgeStore::new(
        Arc::new(HashingEmbedder::new(config.dimensions)),
        &config,
    ))
}
