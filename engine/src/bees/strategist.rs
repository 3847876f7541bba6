//! Ad strategist bee
//!
//! Consumes a shopper analysis and produces a campaign: an overall strategy
//! plus one ad creative per top product, each emitted as a
//! [`CampaignVariant`] ready for A/B evaluation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sdk::agent::{Agent, AgentTracker};
use sdk::errors::EngineError;
use sdk::types::{AgentState, CampaignVariant, Task};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::data::{DataSource, TrendingTopic};
use super::{note_learning_failure, system_with_knowledge};
use crate::ai::AiEngine;
use crate::knowledge::KnowledgeStore;

pub const CAPABILITY: &str = "ad_strategist";

/// Input field carrying the upstream analysis
pub const ANALYSIS_FIELD: &str = "shopper_analysis";

const CREATIVES_PER_CAMPAIGN: usize = 2;
const AD_FORMAT: &str = "video_overlay";
const AD_DURATION_SECS: u32 = 15;

const SYSTEM_PROMPT: &str = "You are an expert advertising strategist. \
You design targeted campaigns and write short, persuasive ad copy for specific shopper segments. \
Always answer with the requested JSON structure.";

pub struct AdStrategist {
    id: String,
    ai: Arc<AiEngine>,
    data: Arc<dyn DataSource>,
    knowledge: Arc<KnowledgeStore>,
}

/// Fields of the shopper analysis the strategist works from
struct Audience<'a> {
    user_id: &'a str,
    segment: &'a str,
    interests: Vec<&'a str>,
    products: Vec<&'a Value>,
}

impl<'a> Audience<'a> {
    fn from_analysis(analysis: &'a Value) -> Result<Self, EngineError> {
        let segment = analysis
            .pointer("/ai_segment/segment")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::AgentProcessing("shopper analysis has no segment".to_string())
            })?;

        Ok(Self {
            user_id: analysis
                .get("user_id")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
            segment,
            interests: analysis
                .pointer("/ai_interests/interests")
                .and_then(Value::as_array)
                .map(|list| list.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default(),
            products: analysis
                .get("recommended_products")
                .and_then(Value::as_array)
                .map(|list| list.iter().collect())
                .unwrap_or_default(),
        })
    }
}

impl AdStrategist {
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

    async fn plan_strategy(
        &self,
        conversation: &str,
        audience: &Audience<'_>,
        trends: &[TrendingTopic],
        system: &str,
        tracker: &AgentTracker,
    ) -> Result<Value, EngineError> {
        let product_titles: Vec<&str> = audience
            .products
            .iter()
            .filter_map(|p| p.get("title").and_then(Value::as_str))
            .take(5)
            .collect();
        let trend_tags: Vec<&str> = trends.iter().map(|t| t.topic.as_str()).collect();

        let prompt = format!(
            "Create an advertising campaign strategy for this shopper.\n\n\
             Segment: {}\nInterests: {}\nRecommended products: {}\nTrending topics: {}",
            audience.segment,
            audience.interests.join(", "),
            product_titles.join(", "),
            trend_tags.join(", ")
        );
        let schema = json!({
            "campaign_name": "string",
            "objective": "awareness | consideration | conversions",
            "messaging_approach": "string",
            "budget": {"daily": 0.0, "total": 0.0},
            "target_metrics": {"ctr": 0.0, "conversion_rate": 0.0, "roas": 0.0},
            "duration_days": 0
        });

        tracker.record_message_sent();
        let (strategy, _) = self
            .ai
            .complete_json(conversation, &prompt, Some(system), Some(&schema))
            .await?;
        tracker.record_message_received();

        if !strategy.is_object() {
            return Err(EngineError::AgentProcessing(
                "campaign strategy is not a JSON object".to_string(),
            ));
        }
        Ok(strategy)
    }

    async fn write_copy(
        &self,
        conversation: &str,
        product: &Value,
        audience: &Audience<'_>,
        strategy: &Value,
        trends: &[TrendingTopic],
        tracker: &AgentTracker,
    ) -> Result<Value, EngineError> {
        let prompt = format!(
            "Write ad copy for a {}-second {} ad.\n\n\
             Product: {} (${})\nSegment: {}\nMessaging approach: {}\nTrending topic to weave in: {}",
            AD_DURATION_SECS,
            AD_FORMAT,
            product["title"].as_str().unwrap_or("product"),
            product["price"],
            audience.segment,
            strategy["messaging_approach"].as_str().unwrap_or("benefit led"),
            trends.first().map(|t| t.topic.as_str()).unwrap_or("none")
        );
        let schema = json!({
            "headline": "max 8 words",
            "body": "max 25 words",
            "cta": "string",
            "tone": "string"
        });

        tracker.record_message_sent();
        let (copy, _) = self
            .ai
            .complete_json(conversation, &prompt, Some(SYSTEM_PROMPT), Some(&schema))
            .await?;
        tracker.record_message_received();

        if !copy.is_object() {
            return Err(EngineError::AgentProcessing(
                "ad copy is not a JSON object".to_string(),
            ));
        }
        Ok(copy)
    }
}

#[async_trait]
impl Agent for AdStrategist {
    fn id(&self) -> &str {
        &self.id
    }

    async fn handle_task(&self, task: &Task, tracker: &AgentTracker) -> Result<Value, EngineError> {
        let analysis = task.input_field(ANALYSIS_FIELD).ok_or_else(|| {
            EngineError::AgentProcessing(format!("missing input field '{}'", ANALYSIS_FIELD))
        })?;
        let audience = Audience::from_analysis(analysis)?;
        info!(
            "{} planning campaign for {} ({})",
            self.id, audience.user_id, audience.segment
        );

        tracker.set_state(AgentState::Thinking);
        let trends = self.data.trending_topics().await?;
        let system = system_with_knowledge(
            &self.knowledge,
            SYSTEM_PROMPT,
            &format!(
                "advertising strategy for {} shoppers interested in {}",
                audience.segment,
                audience.interests.join(" ")
            ),
        )
        .await?;

        tracker.set_state(AgentState::Working);
        let campaign_id = format!("camp_{}", uuid::Uuid::new_v4().simple());
        let conversation = format!("{}:{}", self.id, campaign_id);
        let strategy = self
            .plan_strategy(&conversation, &audience, &trends, &system, tracker)
            .await?;

        let mut variants = Vec::new();
        for product in audience.products.iter().take(CREATIVES_PER_CAMPAIGN) {
            let copy = match self
                .write_copy(&conversation, product, &audience, &strategy, &trends, tracker)
                .await
            {
                Ok(copy) => copy,
                // Unusable copy for one product does not sink the campaign
                Err(EngineError::AgentProcessing(reason)) => {
                    warn!("{} skipped creative for {}: {}", self.id, product["id"], reason);
                    continue;
                }
                Err(e) => return Err(e),
            };

            variants.push(CampaignVariant::new(
                format!("{}_v{}", campaign_id, variants.len() + 1),
                campaign_id.as_str(),
                json!({
                    "product_id": product["id"],
                    "product_title": product["title"],
                    "ad_copy": copy,
                    "format": AD_FORMAT,
                    "duration_seconds": AD_DURATION_SECS,
                }),
            ));
        }

        let trending_aligned: Vec<&str> = trends.iter().take(2).map(|t| t.topic.as_str()).collect();
        let learning = format!(
            "Campaign '{}' for {} shoppers used a {} approach with {} creatives",
            strategy["campaign_name"].as_str().unwrap_or(&campaign_id),
            audience.segment,
            strategy["messaging_approach"].as_str().unwrap_or("default"),
            variants.len()
        );
        note_learning_failure(
            &self.id,
            self.knowledge
                .add_campaign_learning(&campaign_id, &learning, &strategy["target_metrics"])
                .await,
        );

        info!(
            "{} created campaign {} with {} variants",
            self.id,
            campaign_id,
            variants.len()
        );

        Ok(json!({
            "campaign_id": campaign_id,
            "strategy": strategy,
            "variants": variants,
            "target_audience": {
                "user_id": audience.user_id,
                "segment": audience.segment,
                "interests": audience.interests,
                "products_matched": audience.products.len(),
            },
            "trending_aligned": trending_aligned,
            "created_at": Utc::now(),
            "created_by": self.id,
        }))
    }
}
