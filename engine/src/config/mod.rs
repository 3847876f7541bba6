//! Configuration management
//!
//! This module handles loading, validation, and management of the hive configuration.
//! Configuration is stored in TOML format at ~/.hive/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory, persistence backend
//! - **llm**: Provider selection, per-provider model and pricing, request limits
//! - **ledger**: Dollar and token budgets for AI usage
//! - **rate_limit**: Sliding-window request limit for AI calls
//! - **memory**: Conversation memory bounds
//! - **knowledge**: Knowledge store retention and embedding settings
//! - **ab_testing**: Significance threshold and minimum sample size
//!
//! Every section has defaults, so a config file only needs the keys it changes.
//! API keys are never stored here; providers read `OPENAI_API_KEY` and
//! `ANTHROPIC_API_KEY` from the environment.
//!
//! # Examples
//!
//! ```no_run
//! use hive_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Default provider: {}", config.llm.default_provider);
//! println!("Budget: ${:.2}", config.ledger.budget_usd);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// LLM provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Resource ledger budgets
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// AI request rate limit
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Conversation memory
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Knowledge store
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// A/B evaluation
    #[serde(default)]
    pub ab_testing: AbTestingConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Persistence backend (memory, sqlite)
    #[serde(default = "default_persistence")]
    pub persistence: String,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider used by the AI engine (openai, anthropic, ollama)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Completion cap sent with every request
    #[serde(default = "default_max_tokens_per_request")]
    pub max_tokens_per_request: u32,

    /// Deadline for a single provider call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// OpenAI provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,

    /// Anthropic provider settings
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// OpenAI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,

    /// USD per 1k prompt tokens
    #[serde(default = "default_openai_prompt_cost")]
    pub prompt_cost_per_1k: f64,

    /// USD per 1k completion tokens
    #[serde(default = "default_openai_completion_cost")]
    pub completion_cost_per_1k: f64,
}

/// Anthropic provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,

    #[serde(default = "default_anthropic_model")]
    pub model: String,

    #[serde(default = "default_anthropic_prompt_cost")]
    pub prompt_cost_per_1k: f64,

    #[serde(default = "default_anthropic_completion_cost")]
    pub completion_cost_per_1k: f64,
}

/// Ollama provider configuration (local, free)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Resource ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Dollar budget for the ledger lifetime (until reset)
    #[serde(default = "default_budget_usd")]
    pub budget_usd: f64,

    /// Token budget for the ledger lifetime (until reset)
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: u64,

    /// Fraction of either budget at which commits start warning
    #[serde(default = "default_warn_ratio")]
    pub warn_ratio: f64,

    /// Number of usage events kept in memory for reporting
    #[serde(default = "default_usage_log_capacity")]
    pub usage_log_capacity: usize,
}

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

/// Conversation memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Turns kept per conversation
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

/// Knowledge store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Entries retained before the oldest are evicted
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Entries returned when a caller does not specify k
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Insert the built-in segment and benchmark knowledge at startup
    #[serde(default = "default_true")]
    pub seed_base_knowledge: bool,

    /// Embedding backend (hashing, openai)
    #[serde(default = "default_embedding")]
    pub embedding: String,

    /// Vector size of the hashing embedder
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Model used by the openai embedder
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

/// A/B evaluation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTestingConfig {
    /// Two-sided p-value below which a winner is declared
    #[serde(default = "default_significance_threshold")]
    pub significance_threshold: f64,

    /// Impressions each variant needs before a winner can be declared
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.hive")
}

fn default_persistence() -> String {
    "sqlite".to_string()
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_max_tokens_per_request() -> u32 {
    2000
}

fn default_request_timeout() -> u64 {
    60
}

fn default_temperature() -> f32 {
    0.7
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_prompt_cost() -> f64 {
    0.00015
}

fn default_openai_completion_cost() -> f64 {
    0.0006
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_anthropic_prompt_cost() -> f64 {
    0.003
}

fn default_anthropic_completion_cost() -> f64 {
    0.015
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_budget_usd() -> f64 {
    5.0
}

fn default_budget_tokens() -> u64 {
    100_000
}

fn default_warn_ratio() -> f64 {
    0.9
}

fn default_usage_log_capacity() -> usize {
    1000
}

fn default_max_requests() -> usize {
    10
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_turns() -> usize {
    10
}

fn default_max_entries() -> usize {
    10_000
}

fn default_k() -> usize {
    3
}

fn default_embedding() -> String {
    "hashing".to_string()
}

fn default_dimensions() -> usize {
    256
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_significance_threshold() -> f64 {
    0.05
}

fn default_min_sample_size() -> u64 {
    100
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            persistence: default_persistence(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            max_tokens_per_request: default_max_tokens_per_request(),
            request_timeout_secs: default_request_timeout(),
            temperature: default_temperature(),
            openai: OpenAIConfig::default(),
            anthropic: AnthropicConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            prompt_cost_per_1k: default_openai_prompt_cost(),
            completion_cost_per_1k: default_openai_completion_cost(),
        }
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: default_anthropic_base_url(),
            model: default_anthropic_model(),
            prompt_cost_per_1k: default_anthropic_prompt_cost(),
            completion_cost_per_1k: default_anthropic_completion_cost(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            budget_usd: default_budget_usd(),
            budget_tokens: default_budget_tokens(),
            warn_ratio: default_warn_ratio(),
            usage_log_capacity: default_usage_log_capacity(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            default_k: default_k(),
            seed_base_knowledge: true,
            embedding: default_embedding(),
            dimensions: default_dimensions(),
            embedding_model: default_embedding_model(),
        }
    }
}

impl Default for AbTestingConfig {
    fn default() -> Self {
        Self {
            significance_threshold: default_significance_threshold(),
            min_sample_size: default_min_sample_size(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.hive/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails or
    /// validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before path expansion so the file keeps the portable "~" form
        let config = Self::default();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.hive/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".hive").join("config.toml"))
    }

    /// Location of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("hive.db")
    }

    /// Validate and process configuration
    ///
    /// Checks enumerated settings and numeric ranges, expands `~` in the data
    /// directory and creates it when the sqlite backend is selected.
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_backends = ["memory", "sqlite"];
        if !valid_backends.contains(&self.core.persistence.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid persistence backend '{}'. Must be one of: {}",
                self.core.persistence,
                valid_backends.join(", ")
            )));
        }

        let valid_providers = ["openai", "anthropic", "ollama"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        if self.llm.max_tokens_per_request == 0 {
            return Err(EngineError::Config(
                "max_tokens_per_request must be greater than 0".to_string(),
            ));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(EngineError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !(self.ledger.budget_usd.is_finite() && self.ledger.budget_usd >= 0.0) {
            return Err(EngineError::Config(
                "budget_usd must be a non-negative number".to_string(),
            ));
        }
        if self.ledger.warn_ratio <= 0.0 || self.ledger.warn_ratio > 1.0 {
            return Err(EngineError::Config(
                "warn_ratio must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(EngineError::Config(
                "rate_limit.max_requests and rate_limit.window_secs must be greater than 0"
                    .to_string(),
            ));
        }

        if self.memory.max_turns == 0 {
            return Err(EngineError::Config(
                "memory.max_turns must be greater than 0".to_string(),
            ));
        }

        let valid_embeddings = ["hashing", "openai"];
        if !valid_embeddings.contains(&self.knowledge.embedding.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid embedding backend '{}'. Must be one of: {}",
                self.knowledge.embedding,
                valid_embeddings.join(", ")
            )));
        }
        if self.knowledge.max_entries == 0 || self.knowledge.dimensions == 0 {
            return Err(EngineError::Config(
                "knowledge.max_entries and knowledge.dimensions must be greater than 0"
                    .to_string(),
            ));
        }

        let threshold = self.ab_testing.significance_threshold;
        if threshold <= 0.0 || threshold >= 1.0 {
            return Err(EngineError::Config(
                "significance_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if self.core.persistence == "sqlite" && !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
