//! Queen orchestrator
//!
//! Owns the capability registry and the workflow templates, and drives each
//! workflow run task by task. Tasks run sequentially; a task may receive the
//! previous task's result as part of its input.
//!
//! Failure policy: once a task fails, every remaining task is marked failed
//! with a dependency error (or `Cancelled` when the run was cancelled). The
//! run itself always completes and is returned to the caller. Agent errors
//! never escape `run_workflow`; only configuration problems do.

pub mod workflow;

pub use workflow::{TaskOutcome, WorkflowRun, WorkflowStep, WorkflowSummary, WorkflowTemplate};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use sdk::agent::{Agent, AgentTracker};
use sdk::errors::EngineError;
use sdk::types::{AgentRecord, Task, TaskError, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::message_bus::{Event, MessageBus};
use crate::store::{DocumentStore, Filter, AGENTS, WORKFLOW_RUNS};

struct Registered {
    agent: Arc<dyn Agent>,
    tracker: AgentTracker,
}

/// Registry and counters reported by `hive status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub queen_id: String,
    pub total_agents: usize,
    pub workflows_completed: u64,
    pub workflows_failed: u64,
    pub workflows: Vec<String>,
    pub agents: Vec<AgentRecord>,
}

pub struct Orchestrator {
    id: String,
    agents: RwLock<HashMap<String, Registered>>,
    workflows: RwLock<BTreeMap<String, WorkflowTemplate>>,
    bus: MessageBus,
    store: Arc<dyn DocumentStore>,
    workflows_completed: AtomicU64,
    workflows_failed: AtomicU64,
}

impl Orchestrator {
    /// Create an orchestrator with the built-in templates registered
    pub fn new(id: impl Into<String>, bus: MessageBus, store: Arc<dyn DocumentStore>) -> Self {
        let builtin = WorkflowTemplate::full_ad_campaign();
        let mut workflows = BTreeMap::new();
        workflows.insert(builtin.name.clone(), builtin);

        Self {
            id: id.into(),
            agents: RwLock::new(HashMap::new()),
            workflows: RwLock::new(workflows),
            bus,
            store,
            workflows_completed: AtomicU64::new(0),
            workflows_failed: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bind `agent` to `capability`.
    ///
    /// Fails with `DuplicateCapability` when the tag is taken and `overwrite`
    /// is false; the existing binding is left untouched.
    pub async fn register_agent(
        &self,
        capability: &str,
        agent: Arc<dyn Agent>,
        overwrite: bool,
    ) -> Result<(), EngineError> {
        let agent_id = agent.id().to_string();
        let record = {
            let mut agents = self.agents.write();
            if agents.contains_key(capability) && !overwrite {
                return Err(EngineError::DuplicateCapability(capability.to_string()));
            }
            let tracker = AgentTracker::new(AgentRecord::new(agent_id.as_str(), capability));
            let record = tracker.snapshot();
            if let Some(previous) = agents.insert(capability.to_string(), Registered { agent, tracker }) {
                info!(
                    "Replaced {} with {} for capability {}",
                    previous.agent.id(),
                    agent_id,
                    capability
                );
            }
            record
        };

        info!("Registered {} ({})", agent_id, capability);
        self.persist_agent(&record).await;
        self.bus
            .publish(Event::AgentRegistered {
                capability: capability.to_string(),
                agent_id,
            })
            .await;
        Ok(())
    }

    /// Remove the binding for `capability`. Returns false when nothing was bound.
    pub fn deregister_agent(&self, capability: &str) -> bool {
        let removed = self.agents.write().remove(capability);
        if let Some(registered) = &removed {
            info!("Deregistered {} ({})", registered.agent.id(), capability);
        }
        removed.is_some()
    }

    /// Add or replace a workflow template
    pub fn register_workflow(&self, template: WorkflowTemplate) -> Result<(), EngineError> {
        template.validate()?;
        info!(
            "Registered workflow {} ({} steps)",
            template.name,
            template.steps.len()
        );
        self.workflows.write().insert(template.name.clone(), template);
        Ok(())
    }

    pub fn workflow_names(&self) -> Vec<String> {
        self.workflows.read().keys().cloned().collect()
    }

    /// Registry records sorted by capability
    pub fn agents(&self) -> Vec<AgentRecord> {
        let mut records: Vec<AgentRecord> = self
            .agents
            .read()
            .values()
            .map(|r| r.tracker.snapshot())
            .collect();
        records.sort_by(|a, b| a.capability.cmp(&b.capability));
        records
    }

    pub fn status(&self) -> OrchestratorStatus {
        let agents = self.agents();
        OrchestratorStatus {
            queen_id: self.id.clone(),
            total_agents: agents.len(),
            workflows_completed: self.workflows_completed.load(Ordering::Relaxed),
            workflows_failed: self.workflows_failed.load(Ordering::Relaxed),
            workflows: self.workflow_names(),
            agents,
        }
    }

    /// Most recent persisted runs, newest first
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<WorkflowRun>, EngineError> {
        self.store
            .query(WORKFLOW_RUNS, &Filter::new().limit(limit))
            .await?
            .into_iter()
            .map(|doc| {
                serde_json::from_value(doc)
                    .map_err(|e| EngineError::Database(format!("Corrupt workflow run: {}", e)))
            })
            .collect()
    }

    pub async fn run_workflow(
        &self,
        workflow_type: &str,
        input: Value,
    ) -> Result<WorkflowRun, EngineError> {
        self.run_workflow_with_cancel(workflow_type, input, CancellationToken::new())
            .await
    }

    /// Execute a workflow until every task is terminal or `cancel` fires.
    ///
    /// Returns `Err` only for configuration problems detected before any
    /// task starts: unknown workflow, unbound capability, non-object input.
    pub async fn run_workflow_with_cancel(
        &self,
        workflow_type: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<WorkflowRun, EngineError> {
        let template = self
            .workflows
            .read()
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| EngineError::UnknownWorkflow(workflow_type.to_string()))?;

        {
            let agents = self.agents.read();
            if let Some(missing) = template.capabilities().find(|c| !agents.contains_key(*c)) {
                return Err(EngineError::NoAgentAvailable(missing.to_string()));
            }
        }

        let Value::Object(input) = input else {
            return Err(EngineError::Config(
                "workflow input must be a JSON object".to_string(),
            ));
        };

        let run_id = format!(
            "workflow_{}_{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let mut run = WorkflowRun::new(run_id, workflow_type, template.instantiate(&input));

        info!(
            "Workflow {} started: {} ({} tasks)",
            run.id,
            workflow_type,
            run.tasks.len()
        );
        self.bus
            .publish(Event::WorkflowStarted {
                run_id: run.id.clone(),
                workflow_type: workflow_type.to_string(),
                tasks: run.tasks.len(),
            })
            .await;

        let mut previous: Option<Value> = None;
        let mut halted: Option<EngineError> = None;

        for (index, step) in template.steps.iter().enumerate() {
            if let Some(reason) = &halted {
                let inherited = match reason {
                    EngineError::Cancelled => EngineError::Cancelled,
                    _ => EngineError::DependencyFailed(run.tasks[index - 1].id.clone()),
                };
                self.fail_task(&run.id, &mut run.tasks[index], &inherited).await;
                continue;
            }

            if cancel.is_cancelled() {
                self.fail_task(&run.id, &mut run.tasks[index], &EngineError::Cancelled)
                    .await;
                halted = Some(EngineError::Cancelled);
                continue;
            }

            if let (Some(field), Some(result)) = (&step.previous_result_as, previous.take()) {
                bind_input(&mut run.tasks[index], field, result);
            }

            match self.execute_task(&mut run, index, &cancel).await {
                Ok(result) => previous = Some(result),
                Err(e) => halted = Some(e),
            }
        }

        run.finish();
        let success = run.is_successful();
        if success {
            self.workflows_completed.fetch_add(1, Ordering::Relaxed);
            info!(
                "Workflow {} completed in {}ms",
                run.id,
                run.execution_time_ms()
            );
        } else {
            self.workflows_failed.fetch_add(1, Ordering::Relaxed);
            error!("Workflow {} failed", run.id);
        }

        self.persist_run(&run).await;
        self.bus
            .publish(Event::WorkflowCompleted {
                run_id: run.id.clone(),
                success,
                execution_time_ms: run.execution_time_ms(),
            })
            .await;

        Ok(run)
    }

    /// Run one task to a terminal state. On failure the error is recorded on
    /// the task and also returned so the caller can halt the run.
    async fn execute_task(
        &self,
        run: &mut WorkflowRun,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<Value, EngineError> {
        let capability = run.tasks[index].capability.clone();
        let bound = self
            .agents
            .read()
            .get(&capability)
            .map(|r| (Arc::clone(&r.agent), r.tracker.clone()));

        // The capability was checked before the run, but may have been
        // deregistered since
        let Some((agent, tracker)) = bound else {
            let err = EngineError::NoAgentAvailable(capability);
            self.fail_task(&run.id, &mut run.tasks[index], &err).await;
            return Err(err);
        };

        let agent_id = agent.id().to_string();
        if !run.bees_involved.contains(&agent_id) {
            run.bees_involved.push(agent_id.clone());
        }

        run.tasks[index].status = TaskStatus::InProgress;
        debug!("Task {} dispatched to {}", run.tasks[index].id, agent_id);
        self.bus
            .publish(Event::TaskStarted {
                run_id: run.id.clone(),
                task_id: run.tasks[index].id.clone(),
                capability: capability.clone(),
            })
            .await;

        let started = Instant::now();
        let task: &Task = &run.tasks[index];
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = agent.handle_task(task, &tracker) => result,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(result) => {
                tracker.record_completed();
                let task = &mut run.tasks[index];
                task.status = TaskStatus::Done;
                task.result = Some(result.clone());
                task.duration_ms = Some(elapsed_ms);
                info!("Task {} done by {} in {}ms", task.id, agent_id, elapsed_ms);
                self.bus
                    .publish(Event::TaskCompleted {
                        run_id: run.id.clone(),
                        task_id: task.id.clone(),
                        duration_ms: elapsed_ms,
                    })
                    .await;
                Ok(result)
            }
            Err(e) => {
                tracker.record_failed();
                run.tasks[index].duration_ms = Some(elapsed_ms);
                self.fail_task(&run.id, &mut run.tasks[index], &e).await;
                Err(e)
            }
        };

        self.persist_agent(&tracker.snapshot()).await;
        result
    }

    async fn fail_task(&self, run_id: &str, task: &mut Task, err: &EngineError) {
        let task_error = TaskError::from(err);
        match err {
            EngineError::DependencyFailed(_) | EngineError::Cancelled => {
                warn!("Task {} not run: {}", task.id, err)
            }
            _ => error!("Task {} failed: {}", task.id, err),
        }

        self.bus
            .publish(Event::TaskFailed {
                run_id: run_id.to_string(),
                task_id: task.id.clone(),
                kind: task_error.kind,
                error: task_error.message.clone(),
            })
            .await;

        task.status = TaskStatus::Failed;
        task.error = Some(task_error);
    }

    async fn persist_run(&self, run: &WorkflowRun) {
        let doc = match serde_json::to_value(run) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to serialize workflow run {}: {}", run.id, e);
                return;
            }
        };
        if let Err(e) = self.store.put(WORKFLOW_RUNS, &run.id, &doc).await {
            warn!("Failed to persist workflow run {}: {}", run.id, e);
        }
    }

    async fn persist_agent(&self, record: &AgentRecord) {
        let doc = match serde_json::to_value(record) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to serialize agent {}: {}", record.id, e);
                return;
            }
        };
        if let Err(e) = self.store.put(AGENTS, &record.id, &doc).await {
            warn!("Failed to persist agent {}: {}", record.id, e);
        }
    }
}

fn bind_input(task: &mut Task, field: &str, result: Value) {
    match &mut task.input {
        Value::Object(map) => {
            map.insert(field.to_string(), result);
        }
        other => {
            let mut map = Map::new();
            map.insert(field.to_string(), result);
            *other = Value::Object(map);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_bus::EventType;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use sdk::errors::ErrorKind;
    use sdk::types::AgentState;
    use serde_json::json;
    use std::time::Duration;

    /// Echoes its input, or fails / hangs on request
    struct TestBee {
        id: String,
        fail_with: Option<fn() -> EngineError>,
        hang: bool,
    }

    impl TestBee {
        fn ok(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                fail_with: None,
                hang: false,
            })
        }

        fn failing(id: &str, fail_with: fn() -> EngineError) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                fail_with: Some(fail_with),
                hang: false,
            })
        }

        fn hanging(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                fail_with: None,
                hang: true,
            })
        }
    }

    #[async_trait]
    impl Agent for TestBee {
        fn id(&self) -> &str {
            &self.id
        }

        async fn handle_task(&self, task: &Task, tracker: &AgentTracker) -> Result<Value, EngineError> {
            tracker.set_state(AgentState::Working);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            Ok(json!({"handled_by": self.id, "input": task.input}))
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new("queen", MessageBus::new(), Arc::new(InMemoryStore::new()))
    }

    async fn with_bees(shopper: Arc<TestBee>, strategist: Arc<TestBee>) -> Orchestrator {
        let queen = orchestrator();
        queen.register_agent("shopper_analyst", shopper, false).await.unwrap();
        queen.register_agent("ad_strategist", strategist, false).await.unwrap();
        queen
    }

    #[tokio::test]
    async fn test_duplicate_capability_keeps_original() {
        let queen = orchestrator();
        queen.register_agent("shopper_analyst", TestBee::ok("a"), false).await.unwrap();

        let err = queen
            .register_agent("shopper_analyst", TestBee::ok("b"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateCapability(_)));
        assert_eq!(queen.agents()[0].id, "a");

        queen.register_agent("shopper_analyst", TestBee::ok("b"), true).await.unwrap();
        assert_eq!(queen.agents()[0].id, "b");

        assert!(queen.deregister_agent("shopper_analyst"));
        assert!(!queen.deregister_agent("shopper_analyst"));
    }

    #[tokio::test]
    async fn test_unknown_workflow_and_missing_agent() {
        let queen = orchestrator();
        let err = queen.run_workflow("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownWorkflow(_)));

        queen.register_agent("shopper_analyst", TestBee::ok("a"), false).await.unwrap();
        let err = queen
            .run_workflow("full_ad_campaign", json!({"user_id": "u"}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoAgentAvailable(c) if c == "ad_strategist"));
    }

    #[tokio::test]
    async fn test_previous_result_is_bound_into_next_input() {
        let queen = with_bees(TestBee::ok("shopper-1"), TestBee::ok("strategist-1")).await;
        let mut events = queen.bus.subscribe(EventType::All).await;

        let run = queen
            .run_workflow("full_ad_campaign", json!({"user_id": "u1"}))
            .await
            .unwrap();

        assert!(run.is_successful());
        assert_eq!(run.bees_involved, vec!["shopper-1", "strategist-1"]);
        let second = &run.tasks[1];
        assert_eq!(second.input["user_id"], "u1");
        assert_eq!(second.input["shopper_analysis"]["handled_by"], "shopper-1");

        let records = queen.agents();
        assert!(records.iter().all(|r| r.tasks_completed == 1));
        assert!(records.iter().all(|r| r.state == AgentState::Idle));
        assert_eq!(queen.status().workflows_completed, 1);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds.first(), Some(&EventType::WorkflowStarted));
        assert_eq!(kinds.last(), Some(&EventType::WorkflowCompleted));

        let history = queen.recent_runs(5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, run.id);
    }

    #[tokio::test]
    async fn test_failed_task_fails_dependents() {
        let queen = with_bees(
            TestBee::failing("shopper-1", || EngineError::Provider {
                provider: "openai".into(),
                message: "503".into(),
                retryable: true,
            }),
            TestBee::ok("strategist-1"),
        )
        .await;

        let run = queen
            .run_workflow("full_ad_campaign", json!({"user_id": "u1"}))
            .await
            .unwrap();

        assert!(run.is_complete());
        assert!(!run.is_successful());
        let first = run.tasks[0].error.as_ref().unwrap();
        assert_eq!(first.kind, ErrorKind::Provider);
        assert!(first.retryable);
        let second = run.tasks[1].error.as_ref().unwrap();
        assert_eq!(second.kind, ErrorKind::Dependency);
        assert_eq!(run.bees_involved, vec!["shopper-1"]);

        let status = queen.status();
        assert_eq!(status.workflows_failed, 1);
        let shopper = status.agents.iter().find(|a| a.id == "shopper-1").unwrap();
        assert_eq!(shopper.tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_second_task_failure_keeps_first_result() {
        let queen = with_bees(
            TestBee::ok("shopper-1"),
            TestBee::failing("strategist-1", || {
                EngineError::AgentProcessing("no usable strategy".into())
            }),
        )
        .await;

        let run = queen
            .run_workflow("full_ad_campaign", json!({"user_id": "u1"}))
            .await
            .unwrap();

        assert!(run.is_complete());
        assert!(!run.is_successful());
        assert!(!run.success);

        let first = &run.tasks[0];
        assert_eq!(first.status, TaskStatus::Done);
        assert_eq!(first.result.as_ref().unwrap()["handled_by"], "shopper-1");
        assert!(first.error.is_none());

        let second = &run.tasks[1];
        assert_eq!(second.status, TaskStatus::Failed);
        assert_eq!(second.error.as_ref().unwrap().kind, ErrorKind::Processing);
        assert!(second.result.is_none());

        let aggregated = run.aggregated_result.as_ref().unwrap();
        assert_eq!(aggregated.as_object().unwrap().len(), 2);
        assert_eq!(aggregated[&first.id]["handled_by"], "shopper-1");
        assert!(aggregated[&second.id]["message"]
            .as_str()
            .unwrap()
            .contains("no usable strategy"));

        let summary = run.summary();
        assert!(!summary.success);
        assert!(summary.final_result.is_none());
        assert_eq!(summary.bees_involved, vec!["shopper-1", "strategist-1"]);

        let status = queen.status();
        assert_eq!(status.workflows_failed, 1);
        let shopper = status.agents.iter().find(|a| a.id == "shopper-1").unwrap();
        assert_eq!(shopper.tasks_completed, 1);
        let strategist = status.agents.iter().find(|a| a.id == "strategist-1").unwrap();
        assert_eq!(strategist.tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_non_object_input_is_rejected() {
        let queen = with_bees(TestBee::ok("s"), TestBee::ok("a")).await;
        let err = queen
            .run_workflow("full_ad_campaign", json!("user_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_fails_in_flight_and_remaining_tasks() {
        let queen = Arc::new(with_bees(TestBee::hanging("shopper-1"), TestBee::ok("strategist-1")).await);
        let cancel = CancellationToken::new();

        let handle = {
            let queen = Arc::clone(&queen);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                queen
                    .run_workflow_with_cancel("full_ad_campaign", json!({"user_id": "u"}), cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let run = handle.await.unwrap().unwrap();

        assert!(run.is_complete());
        for task in &run.tasks {
            assert_eq!(task.status, TaskStatus::Failed);
            assert_eq!(task.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
        }
        let shopper = queen.agents().into_iter().find(|a| a.id == "shopper-1").unwrap();
        assert_eq!(shopper.state, AgentState::Idle);
    }

    #[tokio::test]
    async fn test_registered_workflow_runs() {
        let queen = with_bees(TestBee::ok("s"), TestBee::ok("a")).await;
        queen
            .register_workflow(WorkflowTemplate::new("analysis_only", "").step("analyze", "shopper_analyst"))
            .unwrap();
        assert!(queen.workflow_names().contains(&"analysis_only".to_string()));

        let run = queen.run_workflow("analysis_only", json!({})).await.unwrap();
        assert_eq!(run.tasks.len(), 1);
        assert!(run.is_successful());
    }
}
