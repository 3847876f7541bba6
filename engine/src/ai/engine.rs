//! AI invocation engine
//!
//! Wraps a single LLM provider with the hive's resource governance. Every
//! completion goes through the same pipeline:
//!
//! 1. rate limit check (refusal leaves the ledger untouched)
//! 2. message assembly: conversation history oldest first, then the optional
//!    system context, then the prompt
//! 3. pessimistic ledger reservation sized from the prompt estimate plus the
//!    completion cap (refusal means the provider is never called)
//! 4. provider call under a deadline; a timeout counts as a provider error
//! 5. on failure the reservation is released; on success it is committed with
//!    the reported usage and the exchange is appended to conversation memory
//!
//! Nothing here retries. Callers decide what to do with a retryable error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::ledger::{BudgetNearlyExceeded, ResourceLedger, UsageEvent, UsageStats};
use super::rate_limit::RateLimiter;
use crate::config::Config;
use crate::llm::{estimate_prompt_tokens, extract_json, LLMError, LLMProvider, Message};
use crate::memory::{ConversationMemory, ConversationTurn};
use crate::message_bus::{Event, MessageBus};
use crate::store::{DocumentStore, CONVERSATIONS, USAGE_EVENTS};

/// Provider output together with what it cost
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub text: String,
    pub usage: UsageEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_warning: Option<BudgetNearlyExceeded>,
}

/// Tunables taken from `[llm]`
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: None,
            max_tokens: config.llm.max_tokens_per_request,
            timeout: Duration::from_secs(config.llm.request_timeout_secs),
        }
    }
}

pub struct AiEngine {
    provider: Arc<dyn LLMProvider>,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    ledger: ResourceLedger,
    limiter: RateLimiter,
    memory: Arc<ConversationMemory>,
    store: Option<Arc<dyn DocumentStore>>,
    bus: Option<MessageBus>,
}

impl AiEngine {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        settings: EngineSettings,
        ledger: ResourceLedger,
        limiter: RateLimiter,
        memory: Arc<ConversationMemory>,
    ) -> Self {
        let model = settings
            .model
            .unwrap_or_else(|| provider.default_model().to_string());
        info!("AI engine using {} ({})", provider.name(), model);

        Self {
            provider,
            model,
            max_tokens: settings.max_tokens,
            timeout: settings.timeout,
            ledger,
            limiter,
            memory,
            store: None,
            bus: None,
        }
    }

    /// Persist usage events and conversations to `store`
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Publish budget warnings on `bus`
    pub fn with_bus(mut self, bus: MessageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn usage_stats(&self) -> UsageStats {
        self.ledger.usage_stats()
    }

    pub async fn check_health(&self) -> bool {
        self.provider.check_health().await
    }

    /// Generate a completion within `conversation_id`
    pub async fn complete(
        &self,
        conversation_id: &str,
        prompt: &str,
        system_context: Option<&str>,
    ) -> Result<AiResponse, EngineError> {
        self.limiter.try_acquire()?;

        let mut messages = self.memory.messages(conversation_id);
        if let Some(system) = system_context {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        let prompt_estimate = estimate_prompt_tokens(&messages);
        let max_tokens = u64::from(self.max_tokens);
        let reservation = self.ledger.reserve(
            prompt_estimate + max_tokens,
            self.provider.estimated_cost(prompt_estimate, max_tokens),
        )?;

        debug!(
            "Invoking {} for conversation {} ({} messages, ~{} prompt tokens)",
            self.provider.name(),
            conversation_id,
            messages.len(),
            prompt_estimate
        );

        let outcome = tokio::time::timeout(
            self.timeout,
            self.provider.invoke(&self.model, &messages, self.max_tokens),
        )
        .await
        .unwrap_or(Err(LLMError::Timeout));

        let completion = match outcome {
            Ok(completion) => completion,
            Err(e) => {
                self.ledger.release(reservation);
                warn!("Provider {} failed: {}", self.provider.name(), e);
                return Err(e.into_engine_error(self.provider.name()));
            }
        };

        let usage = UsageEvent {
            request_id: uuid::Uuid::new_v4().to_string(),
            provider: self.provider.name().to_string(),
            model: completion.model.clone(),
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
            cost_usd: self
                .provider
                .estimated_cost(completion.prompt_tokens, completion.completion_tokens),
            timestamp: Utc::now(),
        };
        let budget_warning = self.ledger.commit(reservation, usage.clone());

        self.memory.append_all(
            conversation_id,
            [
                ConversationTurn::user(conversation_id, prompt),
                ConversationTurn::assistant(conversation_id, completion.text.as_str()),
            ],
        );

        self.persist_usage(&usage).await;
        if let (Some(warning), Some(bus)) = (&budget_warning, &self.bus) {
            bus.publish(Event::BudgetWarning {
                spent_usd: warning.spent_usd,
                budget_usd: warning.budget_usd,
            })
            .await;
        }

        info!(
            "Completion for {}: {} tokens, ${:.6}",
            conversation_id,
            usage.total_tokens(),
            usage.cost_usd
        );

        Ok(AiResponse {
            text: completion.text,
            usage,
            budget_warning,
        })
    }

    /// Generate a completion and parse it as JSON.
    ///
    /// The schema, when given, is appended to the prompt as an example of the
    /// expected shape. Fenced or prose-wrapped JSON is accepted.
    pub async fn complete_json(
        &self,
        conversation_id: &str,
        prompt: &str,
        system_context: Option<&str>,
        schema: Option<&Value>,
    ) -> Result<(Value, AiResponse), EngineError> {
        let json_prompt = match schema {
            Some(schema) => format!(
                "{}\n\nRespond with valid JSON only, matching this structure:\n{}",
                prompt, schema
            ),
            None => format!("{}\n\nRespond with valid JSON only.", prompt),
        };

        let response = self
            .complete(conversation_id, &json_prompt, system_context)
            .await?;

        let value = extract_json(&response.text).ok_or_else(|| {
            EngineError::AgentProcessing(format!(
                "model returned non-JSON output for conversation {}",
                conversation_id
            ))
        })?;

        Ok((value, response))
    }

    /// Write the conversation's current turns to the store
    pub async fn persist_conversation(&self, conversation_id: &str) -> Result<(), EngineError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let doc = json!({
            "conversation_id": conversation_id,
            "turns": self.memory.get_context(conversation_id),
            "updated_at": Utc::now(),
        });
        store.put(CONVERSATIONS, conversation_id, &doc).await
    }

    /// Restore a persisted conversation into memory. Returns false when the
    /// store has no such conversation.
    pub async fn load_conversation(&self, conversation_id: &str) -> Result<bool, EngineError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(doc) = store.get(CONVERSATIONS, conversation_id).await? else {
            return Ok(false);
        };

        let turns: Vec<ConversationTurn> = doc
            .get("turns")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| EngineError::Database(format!("Corrupt conversation record: {}", e)))?
            .unwrap_or_default();

        debug!("Restored {} turns for {}", turns.len(), conversation_id);
        self.memory.restore(conversation_id, turns);
        Ok(true)
    }

    async fn persist_usage(&self, usage: &UsageEvent) {
        let Some(store) = &self.store else {
            return;
        };
        let doc = match serde_json::to_value(usage) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to serialize usage event: {}", e);
                return;
            }
        };
        if let Err(e) = store.put(USAGE_EVENTS, &usage.request_id, &doc).await {
            warn!("Failed to persist usage event {}: {}", usage.request_id, e);
        }
    }
}
