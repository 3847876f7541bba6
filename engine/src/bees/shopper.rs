//! Shopper analyst bee
//!
//! Turns raw behavior analytics for one user into a segment classification,
//! predicted interests and matching products.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sdk::agent::{Agent, AgentTracker};
use sdk::errors::EngineError;
use sdk::types::{AgentState, Task};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::data::{DataSource, Product};
use super::{note_learning_failure, system_with_knowledge};
use crate::ai::AiEngine;
use crate::knowledge::KnowledgeStore;

pub const CAPABILITY: &str = "shopper_analyst";

pub const SEGMENTS: [&str; 5] = [
    "impulse_buyer",
    "researcher",
    "bargain_hunter",
    "premium_buyer",
    "casual_shopper",
];

const FALLBACK_INTERESTS: [&str; 3] = ["Electronics", "Books", "Home"];
const INTERESTS_SEARCHED: usize = 3;
const PRODUCTS_PER_INTEREST: usize = 3;
const MAX_RECOMMENDATIONS: usize = 10;

const SYSTEM_PROMPT: &str = "You are an expert shopping behavior analyst. \
You read e-commerce analytics and explain who a shopper is and what they want. \
Always answer with the requested JSON structure.";

pub struct ShopperAnalyst {
    id: String,
    ai: Arc<AiEngine>,
    data: Arc<dyn DataSource>,
    knowledge: Arc<KnowledgeStore>,
}

impl ShopperAnalyst {
    pub fn new(
        id: impl Into<String>,
        ai: Arc<AiEngine>,
        data: Arc<dyn DataSource>,
        knowledge: Arc<KnowledgeStore>,
    ) -> Self {
        Self {
            id: id.into(),
            ai,
            data,
            knowledge,
        }
    }

    async fn classify_segment(
        &self,
        conversation: &str,
        behavior: &Value,
        system: &str,
        tracker: &AgentTracker,
    ) -> Result<Value, EngineError> {
        let prompt = format!(
            "Analyze this shopper's behavior and classify them into exactly one segment: {}.\n\nBehavior data:\n{}",
            SEGMENTS.join(", "),
            behavior
        );
        let schema = json!({
            "segment": "one of the listed segments",
            "confidence": 0.0,
            "reasoning": "string",
            "characteristics": ["string"]
        });

        tracker.record_message_sent();
        let (segment, _) = self
            .ai
            .complete_json(conversation, &prompt, Some(system), Some(&schema))
            .await?;
        tracker.record_message_received();

        let name = segment
            .get("segment")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::AgentProcessing("segment classification has no segment".to_string())
            })?;
        if !SEGMENTS.contains(&name) {
            return Err(EngineError::AgentProcessing(format!(
                "unknown shopper segment '{}'",
                name
            )));
        }

        Ok(segment)
    }

    async fn predict_interests(
        &self,
        conversation: &str,
        segment: &Value,
        behavior: &Value,
        tracker: &AgentTracker,
    ) -> Result<Value, EngineError> {
        let prompt = format!(
            "Based on this shopper profile, predict their top 5 product interests.\n\nSegment:\n{}\n\nBehavior data:\n{}",
            segment, behavior
        );
        let schema = json!({
            "interests": ["string"],
            "reasoning": "string"
        });

        tracker.record_message_sent();
        let (mut interests, _) = self
            .ai
            .complete_json(conversation, &prompt, Some(SYSTEM_PROMPT), Some(&schema))
            .await?;
        tracker.record_message_received();

        let usable = interests
            .get("interests")
            .and_then(Value::as_array)
            .is_some_and(|list| list.iter().any(Value::is_string));
        if !usable {
            debug!("{} got no usable interests, using defaults", self.id);
            match interests.as_object_mut() {
                Some(object) => {
                    object.insert("interests".to_string(), json!(FALLBACK_INTERESTS));
                }
                None => interests = json!({ "interests": FALLBACK_INTERESTS }),
            }
        }

        Ok(interests)
    }

    async fn match_products(&self, interests: &Value) -> Result<Vec<Product>, EngineError> {
        let keywords: Vec<&str> = interests
            .get("interests")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut products = Vec::new();
        for keyword in keywords.into_iter().take(INTERESTS_SEARCHED) {
            products.extend(
                self.data
                    .search_products(keyword, PRODUCTS_PER_INTEREST)
                    .await?,
            );
        }
        products.truncate(MAX_RECOMMENDATIONS);
        Ok(products)
    }
}

#[async_trait]
impl Agent for ShopperAnalyst {
    fn id(&self) -> &str {
        &self.id
    }

    async fn handle_task(&self, task: &Task, tracker: &AgentTracker) -> Result<Value, EngineError> {
        let user_id = task.input_str("user_id")?;
        info!("{} analyzing shopper {}", self.id, user_id);

        tracker.set_state(AgentState::Thinking);
        let behavior = self.data.user_behavior(user_id).await?;
        let behavior_json = serde_json::to_value(&behavior)
            .map_err(|e| EngineError::AgentProcessing(format!("behavior encoding: {}", e)))?;
        let system = system_with_knowledge(
            &self.knowledge,
            SYSTEM_PROMPT,
            &format!(
                "shopper segment behavior {} sessions {} conversions bounce rate {}",
                behavior.sessions, behavior.conversions, behavior.bounce_rate
            ),
        )
        .await?;

        tracker.set_state(AgentState::Working);
        let conversation = format!("{}:{}", self.id, user_id);
        let segment = self
            .classify_segment(&conversation, &behavior_json, &system, tracker)
            .await?;
        let interests = self
            .predict_interests(&conversation, &segment, &behavior_json, tracker)
            .await?;
        let products = self.match_products(&interests).await?;

        let segment_name = segment["segment"].as_str().unwrap_or_default();
        let insight = format!(
            "Shopper with {} sessions, {:.0}% bounce rate and {} conversions classified as {}: {}",
            behavior.sessions,
            behavior.bounce_rate * 100.0,
            behavior.conversions,
            segment_name,
            segment["reasoning"].as_str().unwrap_or("no reasoning given")
        );
        note_learning_failure(
            &self.id,
            self.knowledge.add_segment_insight(segment_name, &insight).await,
        );

        info!(
            "{} classified {} as {} with {} product matches",
            self.id,
            user_id,
            segment_name,
            products.len()
        );

        Ok(json!({
            "user_id": user_id,
            "behavior_data": behavior_json,
            "ai_segment": segment,
            "ai_interests": interests,
            "recommended_products": products,
            "analyzed_at": Utc::now(),
            "analyzed_by": self.id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bees::SimulatedDataSource;
    use crate::test_support::{campaign_reply, engine, knowledge, ScriptedProvider};
    use sdk::types::AgentRecord;

    fn analyst(provider: Arc<ScriptedProvider>) -> (ShopperAnalyst, Arc<KnowledgeStore>) {
        let knowledge = knowledge();
        let bee = ShopperAnalyst::new(
            "shopper-1",
            engine(provider),
            Arc::new(SimulatedDataSource::new()),
            Arc::clone(&knowledge),
        );
        (bee, knowledge)
    }

    fn task(input: Value) -> Task {
        Task::new("t1", "analyze_shopper", CAPABILITY, input)
    }

    #[tokio::test]
    async fn test_analysis_has_segment_interests_and_products() {
        let provider = Arc::new(ScriptedProvider::campaign());
        let (bee, knowledge) = analyst(Arc::clone(&provider));
        let tracker = AgentTracker::new(AgentRecord::new("shopper-1", CAPABILITY));

        let result = bee
            .handle_task(&task(json!({"user_id": "user_123"})), &tracker)
            .await
            .unwrap();

        assert_eq!(result["user_id"], "user_123");
        assert_eq!(result["ai_segment"]["segment"], "researcher");
        assert_eq!(result["ai_interests"]["interests"][0], "Smart Home");
        assert_eq!(result["recommended_products"].as_array().unwrap().len(), 9);
        assert_eq!(result["analyzed_by"], "shopper-1");

        assert_eq!(provider.call_count(), 2);
        let record = tracker.snapshot();
        assert_eq!(record.messages_sent, 2);
        assert_eq!(record.messages_received, 2);
        assert_eq!(record.state, AgentState::Working);

        assert_eq!(knowledge.stats().total_entries, 1);
    }

    #[tokio::test]
    async fn test_missing_user_id_is_a_processing_error() {
        let provider = Arc::new(ScriptedProvider::campaign());
        let (bee, _) = analyst(Arc::clone(&provider));
        let tracker = AgentTracker::new(AgentRecord::new("shopper-1", CAPABILITY));

        let err = bee.handle_task(&task(json!({})), &tracker).await.unwrap_err();
        assert!(matches!(err, EngineError::AgentProcessing(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_segment_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new(|_| {
            Ok(r#"{"segment": "window_shopper", "confidence": 0.4}"#.to_string())
        }));
        let (bee, _) = analyst(provider);
        let tracker = AgentTracker::new(AgentRecord::new("shopper-1", CAPABILITY));

        let err = bee
            .handle_task(&task(json!({"user_id": "u"})), &tracker)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("window_shopper"));
    }

    #[tokio::test]
    async fn test_missing_interests_fall_back_to_defaults() {
        let provider = Arc::new(ScriptedProvider::new(|prompt| {
            if prompt.contains("predict") {
                Ok(r#"{"reasoning": "not sure"}"#.to_string())
            } else {
                Ok(campaign_reply(prompt).to_string())
            }
        }));
        let (bee, _) = analyst(provider);
        let tracker = AgentTracker::new(AgentRecord::new("shopper-1", CAPABILITY));

        let result = bee
            .handle_task(&task(json!({"user_id": "u"})), &tracker)
            .await
            .unwrap();
        assert_eq!(
            result["ai_interests"]["interests"],
            json!(["Electronics", "Books", "Home"])
        );
        assert_eq!(result["recommended_products"][0]["category"], "Electronics");
    }

    async fn interests_from_reply(reply: &'static str) -> Value {
        let provider = Arc::new(ScriptedProvider::new(move |prompt| {
            if prompt.contains("predict") {
                Ok(reply.to_string())
            } else {
                Ok(campaign_reply(prompt).to_string())
            }
        }));
        let (bee, _) = analyst(provider);
        let tracker = AgentTracker::new(AgentRecord::new("shopper-1", CAPABILITY));

        let result = bee
            .handle_task(&task(json!({"user_id": "u"})), &tracker)
            .await
            .unwrap();
        result["ai_interests"].clone()
    }

    #[tokio::test]
    async fn test_array_interests_reply_falls_back_to_defaults() {
        let interests = interests_from_reply(r#"["Smart Home", "Books"]"#).await;
        assert_eq!(interests, json!({"interests": ["Electronics", "Books", "Home"]}));
    }

    #[tokio::test]
    async fn test_fenced_string_interests_reply_falls_back_to_defaults() {
        let interests = interests_from_reply("```json\n\"gadgets\"\n```").await;
        assert_eq!(interests["interests"], json!(["Electronics", "Books", "Home"]));
    }
}
