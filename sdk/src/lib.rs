//! Hive SDK
//!
//! Shared library providing the agent contract, task types and the error
//! taxonomy used by the engine and by externally supplied worker agents.

/// Worker agent trait and state tracking
pub mod agent;

/// Error types and handling
pub mod errors;

/// Task, agent and campaign types
pub mod types;

// Re-export commonly used types
pub use agent::{Agent, AgentTracker};
pub use errors::{EngineError, ErrorKind, HiveErrorExt};
pub use types::{AgentRecord, AgentState, CampaignVariant, Task, TaskError, TaskStatus};
