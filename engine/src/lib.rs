//! Hive Engine Library
//!
//! This library provides the core functionality of the Hive ad-campaign
//! engine. It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Document persistence module
pub mod store;

/// Message bus for lifecycle events
pub mod message_bus;

/// LLM provider abstraction layer
pub mod llm;

/// Resource ledger, rate limiting and the AI invocation engine
pub mod ai;

/// Conversation memory
pub mod memory;

/// RAG knowledge store
pub mod knowledge;

/// Worker bees and their data sources
pub mod bees;

/// Queen orchestrator and workflow templates
pub mod orchestrator;

/// A/B significance testing
pub mod ab_testing;

/// Hive assembly facade
pub mod hive;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

#[cfg(test)]
pub(crate) mod test_support;

pub use hive::{Hive, HiveBuilder, HiveStatus};
