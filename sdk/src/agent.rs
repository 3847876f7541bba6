//! Worker agent contract
//!
//! Agents are registered with the orchestrator under a capability tag. The
//! orchestrator hands each agent an [`AgentTracker`] so the agent can report
//! its state transitions (`idle -> thinking -> working -> idle`) and message
//! counters without owning the registry entry.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::EngineError;
use crate::types::{AgentRecord, AgentState, Task};

/// Trait that all worker agents must implement
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier of the agent instance
    fn id(&self) -> &str;

    /// Process one task and return a structured result.
    ///
    /// Errors are recorded on the task by the orchestrator; they never abort
    /// the workflow run itself.
    async fn handle_task(&self, task: &Task, tracker: &AgentTracker) -> Result<Value, EngineError>;
}

/// Shared handle onto an agent's registry record.
#[derive(Clone)]
pub struct AgentTracker {
    inner: Arc<Mutex<AgentRecord>>,
}

impl AgentTracker {
    pub fn new(record: AgentRecord) -> Self {
        Self {
            inner: Arc::new(Mutex::new(record)),
        }
    }

    pub fn set_state(&self, state: AgentState) {
        self.inner.lock().state = state;
    }

    pub fn state(&self) -> AgentState {
        self.inner.lock().state
    }

    pub fn record_message_sent(&self) {
        self.inner.lock().messages_sent += 1;
    }

    pub fn record_message_received(&self) {
        self.inner.lock().messages_received += 1;
    }

    pub fn record_completed(&self) {
        let mut record = self.inner.lock();
        record.tasks_completed += 1;
        record.state = AgentState::Idle;
    }

    pub fn record_failed(&self) {
        let mut record = self.inner.lock();
        record.tasks_failed += 1;
        record.state = AgentState::Idle;
    }

    /// Copy of the current record
    pub fn snapshot(&self) -> AgentRecord {
        self.inner.lock().clone()
    }
}
