//! Error types and handling
//!
//! This module provides the error taxonomy shared by every hive component.
//! All errors implement the `HiveErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Configuration errors (unknown workflow, duplicate capability, missing
//! binding) are surfaced to the caller immediately. Resource and provider
//! errors are recoverable and end up recorded on the failing task.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trait for hive error extensions
pub trait HiveErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and never echoes provider
    /// responses or API keys.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried later (budget reset, rate window
    /// elapsed, provider back online). Non-recoverable errors need a
    /// configuration change.
    fn is_recoverable(&self) -> bool;
}

/// Coarse error category reported on every failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Budget,
    RateLimit,
    Provider,
    Processing,
    Dependency,
    Cancelled,
    Persistence,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Budget => "budget",
            Self::RateLimit => "rate_limit",
            Self::Provider => "provider",
            Self::Processing => "processing",
            Self::Dependency => "dependency",
            Self::Cancelled => "cancelled",
            Self::Persistence => "persistence",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorKind, HiveErrorExt};
///
/// let error = EngineError::UnknownWorkflow("launch_rocket".to_string());
/// assert_eq!(error.kind(), ErrorKind::Configuration);
/// assert!(!error.is_recoverable());
///
/// let error = EngineError::RateLimited { count: 10, limit: 10, window_secs: 60 };
/// assert!(error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Capability already registered: {0}")]
    DuplicateCapability(String),

    #[error("No agent available for capability: {0}")]
    NoAgentAvailable(String),

    // Resource governance errors
    #[error(
        "Resource budget exhausted: needed {needed_tokens} tokens / ${needed_usd:.4}, \
         remaining {remaining_tokens} tokens / ${remaining_usd:.4}"
    )]
    ResourceExhausted {
        needed_tokens: u64,
        needed_usd: f64,
        remaining_tokens: u64,
        remaining_usd: f64,
    },

    #[error("Rate limit exceeded: {count}/{limit} requests in {window_secs}s")]
    RateLimited {
        count: usize,
        limit: usize,
        window_secs: u64,
    },

    // LLM provider errors
    #[error("Provider {provider} failed: {message}")]
    Provider {
        provider: String,
        message: String,
        retryable: bool,
    },

    // Agent errors
    #[error("Agent processing failed: {0}")]
    AgentProcessing(String),

    #[error("Upstream task {0} did not complete")]
    DependencyFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    // Persistence errors
    #[error("Database error: {0}")]
    Database(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Category used when the error is recorded on a task.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_)
            | Self::UnknownWorkflow(_)
            | Self::DuplicateCapability(_)
            | Self::NoAgentAvailable(_) => ErrorKind::Configuration,
            Self::ResourceExhausted { .. } => ErrorKind::Budget,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::AgentProcessing(_) => ErrorKind::Processing,
            Self::DependencyFailed(_) => ErrorKind::Dependency,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Database(_) | Self::Io(_) => ErrorKind::Persistence,
        }
    }

    /// Whether a provider failure is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }
}

impl HiveErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",
            Self::UnknownWorkflow(_) => "Run 'hive status' to list the registered workflows",
            Self::DuplicateCapability(_) => {
                "Another agent already serves this capability. Register with overwrite to replace it"
            }
            Self::NoAgentAvailable(_) => "Register an agent for the capability before running",

            // Resource governance errors
            Self::ResourceExhausted { .. } => {
                "The AI budget is spent. Reset the ledger or raise the budget in config.toml"
            }
            Self::RateLimited { .. } => "Too many AI requests. Wait for the rate window to pass",

            // LLM provider errors
            Self::Provider { .. } => "LLM provider unavailable. Check your API keys and network",

            // Agent errors
            Self::AgentProcessing(_) => "The agent could not process its input. Check the logs",
            Self::DependencyFailed(_) => "An earlier step failed. Fix it and rerun the workflow",
            Self::Cancelled => "The workflow was cancelled",

            // Persistence errors
            Self::Database(_) => "Database operation failed. Check the data directory",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_)
            | Self::UnknownWorkflow(_)
            | Self::DuplicateCapability(_)
            | Self::NoAgentAvailable(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
