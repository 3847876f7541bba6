//! Hive assembly
//!
//! [`Hive`] wires the configured provider, ledger, memory, knowledge store,
//! persistence backend and worker bees into one orchestrated system, and is
//! the entry point the CLI and embedding applications call.

use std::sync::Arc;

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ab_testing::AbEvaluator;
use crate::ai::{AiEngine, EngineSettings, LedgerSnapshot, RateLimiter, ResourceLedger, UsageStats};
use crate::bees::{shopper, strategist, AdStrategist, DataSource, ShopperAnalyst, SimulatedDataSource};
use crate::config::Config;
use crate::knowledge::{KnowledgeStats, KnowledgeStore};
use crate::llm::{build_provider, LLMProvider};
use crate::memory::ConversationMemory;
use crate::message_bus::MessageBus;
use crate::orchestrator::{Orchestrator, OrchestratorStatus, WorkflowRun, WorkflowSummary};
use crate::store::{DocumentStore, InMemoryStore, SqliteStore};

pub const QUEEN_ID: &str = "queen_bee_001";
pub const SHOPPER_ID: &str = "shopper_bee_001";
pub const STRATEGIST_ID: &str = "ad_bee_001";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiStatus {
    pub provider: String,
    pub model: String,
    pub active_conversations: usize,
}

/// Snapshot returned by [`Hive::get_system_status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiveStatus {
    pub version: String,
    pub persistence: String,
    pub orchestrator: OrchestratorStatus,
    pub ai: AiStatus,
    pub ledger: LedgerSnapshot,
    pub knowledge: KnowledgeStats,
}

pub struct Hive {
    orchestrator: Arc<Orchestrator>,
    ai: Arc<AiEngine>,
    knowledge: Arc<KnowledgeStore>,
    evaluator: AbEvaluator,
    bus: MessageBus,
    store: Arc<dyn DocumentStore>,
}

/// Overrides for the parts [`Hive::from_config`] would otherwise build
#[derive(Default)]
pub struct HiveBuilder {
    provider: Option<Arc<dyn LLMProvider>>,
    store: Option<Arc<dyn DocumentStore>>,
    data: Option<Arc<dyn DataSource>>,
}

impl HiveBuilder {
    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn data_source(mut self, data: Arc<dyn DataSource>) -> Self {
        self.data = Some(data);
        self
    }

    pub async fn build(self, config: &Config) -> Result<Hive, EngineError> {
        let provider = match self.provider {
            Some(provider) => provider,
            None => build_provider(&config.llm)?,
        };
        let store = match self.store {
            Some(store) => store,
            None => open_store(config).await?,
        };
        let data = self
            .data
            .unwrap_or_else(|| Arc::new(SimulatedDataSource::new()));

        let bus = MessageBus::new();
        let memory = Arc::new(ConversationMemory::new(&config.memory));
        let ai = Arc::new(
            AiEngine::new(
                provider,
                EngineSettings::from_config(config),
                ResourceLedger::new(&config.ledger),
                RateLimiter::new(&config.rate_limit),
                memory,
            )
            .with_store(Arc::clone(&store))
            .with_bus(bus.clone()),
        );

        let embedder =
            KnowledgeStore::embedder_from_config(&config.knowledge, &config.llm.openai.base_url);
        let knowledge = Arc::new(KnowledgeStore::new(embedder, &config.knowledge));
        if config.knowledge.seed_base_knowledge {
            knowledge.seed_base_knowledge().await?;
        }

        let orchestrator = Arc::new(Orchestrator::new(
            QUEEN_ID,
            bus.clone(),
            Arc::clone(&store),
        ));
        orchestrator
            .register_agent(
                shopper::CAPABILITY,
                Arc::new(ShopperAnalyst::new(
                    SHOPPER_ID,
                    Arc::clone(&ai),
                    Arc::clone(&data),
                    Arc::clone(&knowledge),
                )),
                false,
            )
            .await?;
        orchestrator
            .register_agent(
                strategist::CAPABILITY,
                Arc::new(AdStrategist::new(
                    STRATEGIST_ID,
                    Arc::clone(&ai),
                    data,
                    Arc::clone(&knowledge),
                )),
                false,
            )
            .await?;

        info!(
            "Hive ready: {} via {}, {} persistence",
            ai.model(),
            ai.provider_name(),
            store.backend()
        );

        Ok(Hive {
            orchestrator,
            ai,
            knowledge,
            evaluator: AbEvaluator::new(&config.ab_testing),
            bus,
            store,
        })
    }
}

/// Persistence backend selected by `core.persistence`
pub async fn open_store(config: &Config) -> Result<Arc<dyn DocumentStore>, EngineError> {
    match config.core.persistence.as_str() {
        "sqlite" => {
            let store = SqliteStore::new(&config.database_path())
                .await
                .map_err(|e| EngineError::Database(format!("{:#}", e)))?;
            Ok(Arc::new(store))
        }
        _ => Ok(Arc::new(InMemoryStore::new())),
    }
}

impl Hive {
    pub fn builder() -> HiveBuilder {
        HiveBuilder::default()
    }

    /// Assemble the hive entirely from configuration
    pub async fn from_config(config: &Config) -> Result<Self, EngineError> {
        Self::builder().build(config).await
    }

    /// Run a workflow and report its outcome. Agent failures are reported
    /// inside the summary; only configuration problems return `Err`.
    pub async fn execute_workflow(
        &self,
        workflow_type: &str,
        data: Value,
    ) -> Result<WorkflowSummary, EngineError> {
        self.execute_workflow_with_cancel(workflow_type, data, CancellationToken::new())
            .await
    }

    pub async fn execute_workflow_with_cancel(
        &self,
        workflow_type: &str,
        data: Value,
        cancel: CancellationToken,
    ) -> Result<WorkflowSummary, EngineError> {
        let run = self
            .orchestrator
            .run_workflow_with_cancel(workflow_type, data, cancel)
            .await?;
        Ok(run.summary())
    }

    pub fn get_system_status(&self) -> HiveStatus {
        HiveStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            persistence: self.store.backend().to_string(),
            orchestrator: self.orchestrator.status(),
            ai: AiStatus {
                provider: self.ai.provider_name().to_string(),
                model: self.ai.model().to_string(),
                active_conversations: self.ai.memory().conversation_count(),
            },
            ledger: self.ai.ledger().snapshot(),
            knowledge: self.knowledge.stats(),
        }
    }

    pub fn get_ai_usage_stats(&self) -> UsageStats {
        self.ai.usage_stats()
    }

    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<WorkflowRun>, EngineError> {
        self.orchestrator.recent_runs(limit).await
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn ai(&self) -> &Arc<AiEngine> {
        &self.ai
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeStore> {
        &self.knowledge
    }

    pub fn evaluator(&self) -> &AbEvaluator {
        &self.evaluator
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Unbind every worker so no new task can start
    pub fn shutdown(&self) {
        for record in self.orchestrator.agents() {
            self.orchestrator.deregister_agent(&record.capability);
        }
        info!("Hive shut down");
    }
}
