//! Task, agent and campaign types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{EngineError, ErrorKind};

/// Lifecycle of a task inside a workflow run.
///
/// Tasks only move forward: `Pending -> InProgress -> Done | Failed`, or
/// straight from `Pending` to `Failed` when an upstream task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Error recorded on a failed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&EngineError> for TaskError {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl From<EngineError> for TaskError {
    fn from(err: EngineError) -> Self {
        Self::from(&err)
    }
}

/// One unit of work inside a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub capability: String,
    pub input: Value,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        capability: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            capability: capability.into(),
            input,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            duration_ms: None,
        }
    }

    /// Look up a field of the task input
    pub fn input_field(&self, key: &str) -> Option<&Value> {
        self.input.get(key)
    }

    /// Get a required string field of the task input
    pub fn input_str(&self, key: &str) -> Result<&str, EngineError> {
        self.input
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::AgentProcessing(format!("missing input field '{key}'")))
    }
}

/// Observable state of a worker agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    Thinking,
    Working,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Working => "working",
        }
    }
}

/// Registry entry describing one agent and its counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub capability: String,
    pub state: AgentState,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

impl AgentRecord {
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            state: AgentState::Idle,
            tasks_completed: 0,
            tasks_failed: 0,
            messages_sent: 0,
            messages_received: 0,
        }
    }
}

/// A campaign variant with its delivery counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignVariant {
    pub id: String,
    pub campaign_group: String,
    pub content: Value,
    #[serde(default)]
    pub impressions: u64,
    #[serde(default)]
    pub conversions: u64,
}

impl CampaignVariant {
    pub fn new(id: impl Into<String>, campaign_group: impl Into<String>, content: Value) -> Self {
        Self {
            id: id.into(),
            campaign_group: campaign_group.into(),
            content,
            impressions: 0,
            conversions: 0,
        }
    }

    pub fn with_counts(mut self, impressions: u64, conversions: u64) -> Self {
        self.impressions = impressions;
        self.conversions = conversions;
        self
    }

    /// Conversions per impression, zero when nothing was shown yet.
    pub fn conversion_rate(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.conversions as f64 / self.impressions as f64
        }
    }
}
