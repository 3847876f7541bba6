//! LLM Provider Abstraction Layer
//!
//! This module provides a common interface for the LLM providers the AI engine
//! can be pointed at (OpenAI, Anthropic, Ollama). The LLMProvider trait defines
//! the contract every provider implements: a single `invoke` call that returns
//! the generated text together with the token usage the ledger is charged for.

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::LLMConfig;

pub mod anthropic;
pub mod ollama;
pub mod openai;

/// Rough characters-per-token ratio used before a provider reports real usage
pub const CHARS_PER_TOKEN: usize = 4;

/// Per-message overhead (role markers, separators)
const MESSAGE_OVERHEAD_TOKENS: usize = 10;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Server error {0}: {1}")]
    ServerError(u16, String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LLMError {
    /// Whether the same request may succeed if sent again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_)
                | Self::RateLimitExceeded
                | Self::ServerError(..)
                | Self::NetworkError(_)
                | Self::Timeout
        )
    }

    /// Convert into the shared taxonomy, tagging the failing provider
    pub fn into_engine_error(self, provider: &str) -> EngineError {
        EngineError::Provider {
            provider: provider.to_string(),
            retryable: self.is_retryable(),
            message: self.to_string(),
        }
    }

    /// Map a non-success HTTP status onto an error variant
    pub(crate) fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            429 => Self::RateLimitExceeded,
            500..=599 => Self::ServerError(status, body),
            _ => Self::InvalidRequest(body),
        }
    }
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Text generated by a provider plus the usage it reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Completion {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// USD prices per 1k tokens
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pricing {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl Pricing {
    pub fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    /// Local providers are free
    pub fn free() -> Self {
        Self::default()
    }

    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "openai", "anthropic", "ollama")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama)
    fn is_local(&self) -> bool;

    /// Model used when the caller does not pick one
    fn default_model(&self) -> &str;

    /// Per-1k token prices used for reservations and usage events
    fn pricing(&self) -> Pricing;

    /// Estimated USD cost of a request of the given size
    fn estimated_cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        self.pricing().cost(prompt_tokens, completion_tokens)
    }

    /// Generate a completion
    ///
    /// # Arguments
    /// * `model` - Model identifier understood by the provider
    /// * `messages` - Ordered conversation: history, system context, prompt
    /// * `max_tokens` - Completion cap
    async fn invoke(&self, model: &str, messages: &[Message], max_tokens: u32)
        -> Result<Completion>;

    /// Check if the provider is currently healthy and available
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Build the provider selected by `llm.default_provider`
pub fn build_provider(config: &LLMConfig) -> std::result::Result<Arc<dyn LLMProvider>, EngineError> {
    match config.default_provider.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAIProvider::from_env(
            config.openai.clone(),
        ))),
        "anthropic" => Ok(Arc::new(anthropic::AnthropicProvider::from_env(
            config.anthropic.clone(),
        ))),
        "ollama" => Ok(Arc::new(ollama::OllamaProvider::new(
            config.ollama.base_url.clone(),
            config.ollama.model.clone(),
        ))),
        other => Err(EngineError::Config(format!(
            "Unknown LLM provider '{}'",
            other
        ))),
    }
}

/// Estimate the token count of a piece of text
pub fn estimate_tokens(text: &str) -> u64 {
    text.len().div_ceil(CHARS_PER_TOKEN) as u64
}

/// Estimate the prompt size of a message list including per-message overhead
pub fn estimate_prompt_tokens(messages: &[Message]) -> u64 {
    messages
        .iter()
        .map(|m| estimate_tokens(&m.content) + MESSAGE_OVERHEAD_TOKENS as u64)
        .sum()
}

/// Pull a JSON object out of model output.
///
/// Handles multiple LLM output formats:
/// 1. Raw JSON: the whole reply is an object
/// 2. Fenced JSON (with or without trailing text): ` ```json\n{...}\n``` `
/// 3. JSON embedded in prose: the first balanced `{...}` block
pub fn extract_json(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Ok(value) = serde_json::from_str(inner.trim()) {
            return Some(value);
        }
    }

    let mut search_from = 0;
    while let Some(rel) = trimmed[search_from..].find('{') {
        let pos = search_from + rel;
        if let Some(json_str) = extract_balanced_json(&trimmed[pos..]) {
            if let Ok(value) = serde_json::from_str(json_str) {
                return Some(value);
            }
        }
        search_from = pos + 1;
    }

    None
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
