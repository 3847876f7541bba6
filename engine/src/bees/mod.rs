//! Worker bees
//!
//! Each bee implements [`sdk::Agent`] for one capability and is bound to the
//! orchestrator under that tag. Bees share the AI engine and knowledge store
//! through `Arc` handles; all budget and rate enforcement happens inside the
//! engine.

pub mod data;
pub mod shopper;
pub mod strategist;

pub use data::{DataSource, Product, SimulatedDataSource, TrendingTopic, UserBehavior};
pub use shopper::ShopperAnalyst;
pub use strategist::AdStrategist;

use sdk::errors::EngineError;
use tracing::warn;

use crate::knowledge::KnowledgeStore;

/// Append retrieved knowledge to a bee's base system prompt
pub(crate) async fn system_with_knowledge(
    knowledge: &KnowledgeStore,
    base: &str,
    query: &str,
) -> Result<String, EngineError> {
    let context = knowledge
        .context_for_prompt(query, knowledge.default_k())
        .await?;
    if context.is_empty() {
        Ok(base.to_string())
    } else {
        Ok(format!("{}\n\nRelevant knowledge:\n{}", base, context))
    }
}

/// Log and drop a failed knowledge write. Learnings are best effort.
pub(crate) fn note_learning_failure(bee: &str, result: Result<String, EngineError>) {
    if let Err(e) = result {
        warn!("{} could not record learning: {}", bee, e);
    }
}
