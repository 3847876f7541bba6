//! A/B test lifecycle
//!
//! An [`AbTest`] owns its variants, a traffic split and the counters fed by
//! delivery feedback. Statistics come from the [`AbEvaluator`].

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::CampaignVariant;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{assignment_point, weighted_index, AbEvaluator, GroupResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Draft,
    Running,
    Paused,
    Completed,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

/// Delivery figures for one variant, including derived rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantMetrics {
    pub id: String,
    pub weight: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub cost_usd: f64,
    /// Clicks per impression
    pub ctr: f64,
    /// Conversions per impression
    pub conversion_rate: f64,
    /// Cost per click
    pub cpc: f64,
    /// Cost per conversion
    pub cpa: f64,
}

/// Snapshot of a test with its significance verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestReport {
    pub test_id: String,
    pub name: String,
    pub status: TestStatus,
    pub variants: Vec<VariantMetrics>,
    pub outcome: GroupResult,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

struct Arm {
    variant: CampaignVariant,
    weight: f64,
    clicks: u64,
    cost_usd: f64,
}

impl Arm {
    fn metrics(&self) -> VariantMetrics {
        let v = &self.variant;
        VariantMetrics {
            id: v.id.clone(),
            weight: self.weight,
            impressions: v.impressions,
            clicks: self.clicks,
            conversions: v.conversions,
            cost_usd: self.cost_usd,
            ctr: per(self.clicks as f64, v.impressions),
            conversion_rate: v.conversion_rate(),
            cpc: per(self.cost_usd, self.clicks),
            cpa: per(self.cost_usd, v.conversions),
        }
    }
}

fn per(amount: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        amount / count as f64
    }
}

/// One experiment over two or more variants.
///
/// Starts as a draft. Counters only move while the test is running.
pub struct AbTest {
    id: String,
    name: String,
    status: TestStatus,
    arms: Vec<Arm>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl AbTest {
    /// Create a draft test. `traffic_split` defaults to an even split and is
    /// normalized to sum to 1.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        variants: Vec<CampaignVariant>,
        traffic_split: Option<Vec<f64>>,
    ) -> Result<Self, EngineError> {
        let id = id.into();
        if variants.len() < 2 {
            return Err(EngineError::Config(format!(
                "A/B test {} needs at least two variants, got {}",
                id,
                variants.len()
            )));
        }
        for (i, v) in variants.iter().enumerate() {
            if variants[..i].iter().any(|other| other.id == v.id) {
                return Err(EngineError::Config(format!(
                    "A/B test {} has duplicate variant {}",
                    id, v.id
                )));
            }
        }

        let weights = match traffic_split {
            None => vec![1.0; variants.len()],
            Some(split) => {
                if split.len() != variants.len() {
                    return Err(EngineError::Config(format!(
                        "traffic split has {} weights for {} variants",
                        split.len(),
                        variants.len()
                    )));
                }
                if split.iter().any(|w| !w.is_finite() || *w < 0.0) {
                    return Err(EngineError::Config(
                        "traffic split weights must be finite and non-negative".to_string(),
                    ));
                }
                split
            }
        };
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(EngineError::Config(
                "traffic split must give some variant traffic".to_string(),
            ));
        }

        let arms = variants
            .into_iter()
            .zip(weights)
            .map(|(variant, weight)| Arm {
                variant,
                weight: weight / total,
                clicks: 0,
                cost_usd: 0.0,
            })
            .collect();

        let name = name.into();
        info!("A/B test {} created: {}", id, name);
        Ok(Self {
            id,
            name,
            status: TestStatus::Draft,
            arms,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn variants(&self) -> impl Iterator<Item = &CampaignVariant> {
        self.arms.iter().map(|arm| &arm.variant)
    }

    /// Begin or resume collecting data
    pub fn start(&mut self) -> Result<(), EngineError> {
        match self.status {
            TestStatus::Draft | TestStatus::Paused => {
                self.status = TestStatus::Running;
                self.started_at.get_or_insert_with(Utc::now);
                info!("A/B test {} running", self.id);
                Ok(())
            }
            other => Err(self.bad_transition(other, TestStatus::Running)),
        }
    }

    pub fn pause(&mut self) -> Result<(), EngineError> {
        match self.status {
            TestStatus::Running => {
                self.status = TestStatus::Paused;
                info!("A/B test {} paused", self.id);
                Ok(())
            }
            other => Err(self.bad_transition(other, TestStatus::Paused)),
        }
    }

    pub fn complete(&mut self) -> Result<(), EngineError> {
        match self.status {
            TestStatus::Completed => {
                Err(self.bad_transition(TestStatus::Completed, TestStatus::Completed))
            }
            _ => {
                self.status = TestStatus::Completed;
                self.completed_at = Some(Utc::now());
                info!("A/B test {} completed", self.id);
                Ok(())
            }
        }
    }

    fn bad_transition(&self, from: TestStatus, to: TestStatus) -> EngineError {
        EngineError::Config(format!(
            "A/B test {} cannot move from {} to {}",
            self.id,
            from.as_str(),
            to.as_str()
        ))
    }

    /// Variant shown to `user_id`, following the traffic split. Sticky for
    /// the lifetime of the test.
    pub fn assign(&self, user_id: &str) -> &CampaignVariant {
        let weights: Vec<f64> = self.arms.iter().map(|arm| arm.weight).collect();
        let index = weighted_index(assignment_point(&self.id, user_id), &weights);
        // `new` guarantees at least two arms
        &self.arms[index.min(self.arms.len() - 1)].variant
    }

    pub fn record_impression(&mut self, variant_id: &str) -> Result<(), EngineError> {
        let arm = self.running_arm(variant_id)?;
        arm.variant.impressions += 1;
        Ok(())
    }

    pub fn record_click(&mut self, variant_id: &str) -> Result<(), EngineError> {
        let arm = self.running_arm(variant_id)?;
        arm.clicks += 1;
        Ok(())
    }

    pub fn record_conversion(
        &mut self,
        variant_id: &str,
        cost_usd: f64,
    ) -> Result<(), EngineError> {
        if !cost_usd.is_finite() || cost_usd < 0.0 {
            return Err(EngineError::Config(format!(
                "conversion cost must be non-negative, got {}",
                cost_usd
            )));
        }
        let arm = self.running_arm(variant_id)?;
        arm.variant.conversions += 1;
        arm.cost_usd += cost_usd;
        Ok(())
    }

    fn running_arm(&mut self, variant_id: &str) -> Result<&mut Arm, EngineError> {
        if self.status != TestStatus::Running {
            return Err(EngineError::Config(format!(
                "A/B test {} is {}, not recording",
                self.id,
                self.status.as_str()
            )));
        }
        let id = &self.id;
        self.arms
            .iter_mut()
            .find(|arm| arm.variant.id == variant_id)
            .ok_or_else(|| {
                EngineError::Config(format!("A/B test {} has no variant {}", id, variant_id))
            })
    }

    pub fn metrics(&self) -> Vec<VariantMetrics> {
        self.arms.iter().map(Arm::metrics).collect()
    }

    /// Current metrics plus the significance verdict over all variants
    pub fn report(&self, evaluator: &AbEvaluator) -> Result<AbTestReport, EngineError> {
        let variants: Vec<CampaignVariant> = self.variants().cloned().collect();
        let outcome = evaluator.evaluate_group(&variants)?;
        debug!("A/B test {} leader {}", self.id, outcome.leader_id);

        Ok(AbTestReport {
            test_id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            variants: self.metrics(),
            outcome,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}
