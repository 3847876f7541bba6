//! Workflow templates and run records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::{Task, TaskError, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bees::{shopper, strategist};

pub const FULL_AD_CAMPAIGN: &str = "full_ad_campaign";

/// One step of a template, executed by whichever agent serves `capability`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub task_type: String,
    pub capability: String,
    /// When set, the previous step's result is added to this step's input
    /// under this field name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_result_as: Option<String>,
}

/// Ordered list of steps registered under a workflow name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step that receives only the workflow input
    pub fn step(mut self, task_type: impl Into<String>, capability: impl Into<String>) -> Self {
        self.steps.push(WorkflowStep {
            task_type: task_type.into(),
            capability: capability.into(),
            previous_result_as: None,
        });
        self
    }

    /// Append a step that also receives the previous step's result
    pub fn step_after(
        mut self,
        task_type: impl Into<String>,
        capability: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.steps.push(WorkflowStep {
            task_type: task_type.into(),
            capability: capability.into(),
            previous_result_as: Some(field.into()),
        });
        self
    }

    /// Shopper analysis followed by campaign creation
    pub fn full_ad_campaign() -> Self {
        Self::new(
            FULL_AD_CAMPAIGN,
            "Analyze a shopper, then build an ad campaign from the analysis",
        )
        .step("analyze_shopper", shopper::CAPABILITY)
        .step_after(
            "create_campaign",
            strategist::CAPABILITY,
            strategist::ANALYSIS_FIELD,
        )
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Config("workflow name cannot be empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(EngineError::Config(format!(
                "workflow '{}' has no steps",
                self.name
            )));
        }
        if let Some(first) = self.steps.first() {
            if first.previous_result_as.is_some() {
                return Err(EngineError::Config(format!(
                    "first step of workflow '{}' has no previous result to bind",
                    self.name
                )));
            }
        }
        Ok(())
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.capability.as_str())
    }

    /// Pending tasks for one run, in step order
    pub(crate) fn instantiate(&self, input: &Map<String, Value>) -> Vec<Task> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                Task::new(
                    format!("task_{}_{}", i + 1, step.task_type),
                    step.task_type.as_str(),
                    step.capability.as_str(),
                    Value::Object(input.clone()),
                )
            })
            .collect()
    }
}

/// Final state of one task as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub capability: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl From<&Task> for TaskOutcome {
    fn from(task: &Task) -> Self {
        Self {
            status: task.status,
            capability: task.capability.clone(),
            result: task.result.clone(),
            error: task.error.clone(),
            duration_ms: task.duration_ms,
        }
    }
}

/// One execution of a workflow template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_type: String,
    pub tasks: Vec<Task>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Task id to result or error, set once every task is terminal
    pub aggregated_result: Option<Value>,
    pub bees_involved: Vec<String>,
    /// Copy of `is_successful()` for store filtering
    #[serde(default)]
    pub success: bool,
}

impl WorkflowRun {
    pub(crate) fn new(id: String, workflow_type: &str, tasks: Vec<Task>) -> Self {
        Self {
            id,
            workflow_type: workflow_type.to_string(),
            tasks,
            started_at: Utc::now(),
            completed_at: None,
            aggregated_result: None,
            bees_involved: Vec::new(),
            success: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn is_successful(&self) -> bool {
        self.is_complete() && self.tasks.iter().all(|t| t.status == TaskStatus::Done)
    }

    pub fn execution_time_ms(&self) -> u64 {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    pub(crate) fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
        self.success = self.is_successful();
        let aggregated: Map<String, Value> = self
            .tasks
            .iter()
            .map(|t| {
                let value = match (&t.result, &t.error) {
                    (Some(result), _) => result.clone(),
                    (None, Some(error)) => serde_json::to_value(error).unwrap_or(Value::Null),
                    (None, None) => Value::Null,
                };
                (t.id.clone(), value)
            })
            .collect();
        self.aggregated_result = Some(Value::Object(aggregated));
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            workflow_id: self.id.clone(),
            workflow_type: self.workflow_type.clone(),
            success: self.is_successful(),
            execution_time_ms: self.execution_time_ms(),
            bees_involved: self.bees_involved.clone(),
            tasks: self
                .tasks
                .iter()
                .map(|t| (t.id.clone(), TaskOutcome::from(t)))
                .collect(),
            final_result: self
                .tasks
                .last()
                .filter(|_| self.is_successful())
                .and_then(|t| t.result.clone()),
        }
    }
}

/// Caller-facing report of a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub workflow_type: String,
    pub success: bool,
    pub execution_time_ms: u64,
    pub bees_involved: Vec<String>,
    pub tasks: BTreeMap<String, TaskOutcome>,
    /// Result of the last task when the run succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<Value>,
}

impl WorkflowSummary {
    /// First recorded failure, if any
    pub fn first_error(&self) -> Option<(&str, &TaskError)> {
        self.tasks
            .iter()
            .find_map(|(id, outcome)| outcome.error.as_ref().map(|e| (id.as_str(), e)))
    }
}
