//! A/B Evaluator
//!
//! Decides whether one campaign variant converts better than another using
//! a pooled two-proportion z-test (two-sided). A winner is declared only when
//! the p-value is below the configured threshold and every compared variant
//! has at least `min_sample_size` impressions.

mod experiment;

pub use experiment::{AbTest, AbTestReport, TestStatus, VariantMetrics};

use sdk::errors::EngineError;
use sdk::types::CampaignVariant;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AbTestingConfig;

/// Per-variant figures reported with a test result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
    pub id: String,
    pub impressions: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
}

impl From<&CampaignVariant> for VariantStats {
    fn from(v: &CampaignVariant) -> Self {
        Self {
            id: v.id.clone(),
            impressions: v.impressions,
            conversions: v.conversions,
            conversion_rate: v.conversion_rate(),
        }
    }
}

/// Outcome of comparing two variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestResult {
    pub a: VariantStats,
    pub b: VariantStats,
    pub winner_id: Option<String>,
    pub z_score: f64,
    pub p_value: f64,
    /// `1 - p_value`
    pub confidence: f64,
    /// Relative improvement of the better variant over the other; absent
    /// when the weaker variant has a zero rate
    pub lift: Option<f64>,
    pub significant: bool,
    pub sufficient_sample: bool,
}

/// Outcome of comparing the leader of a group against every other variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupResult {
    pub leader_id: String,
    pub winner_id: Option<String>,
    /// Largest pairwise p-value, i.e. the weakest of the leader's wins
    pub p_value: f64,
    pub confidence: f64,
    pub comparisons: Vec<AbTestResult>,
}

#[derive(Debug, Clone)]
pub struct AbEvaluator {
    significance_threshold: f64,
    min_sample_size: u64,
}

impl AbEvaluator {
    pub fn new(config: &AbTestingConfig) -> Self {
        Self {
            significance_threshold: config.significance_threshold,
            min_sample_size: config.min_sample_size,
        }
    }

    pub fn significance_threshold(&self) -> f64 {
        self.significance_threshold
    }

    pub fn min_sample_size(&self) -> u64 {
        self.min_sample_size
    }

    /// Compare two variants
    pub fn evaluate(&self, a: &CampaignVariant, b: &CampaignVariant) -> AbTestResult {
        let a_stats = VariantStats::from(a);
        let b_stats = VariantStats::from(b);
        let z = z_score(a.conversions, a.impressions, b.conversions, b.impressions);
        let p_value = two_sided_p_value(z);

        let significant = p_value < self.significance_threshold;
        let sufficient_sample =
            a.impressions >= self.min_sample_size && b.impressions >= self.min_sample_size;

        let (better, worse) = if b_stats.conversion_rate >= a_stats.conversion_rate {
            (&b_stats, &a_stats)
        } else {
            (&a_stats, &b_stats)
        };
        let lift = (worse.conversion_rate > 0.0)
            .then(|| (better.conversion_rate - worse.conversion_rate) / worse.conversion_rate);

        let winner_id = (significant
            && sufficient_sample
            && better.conversion_rate > worse.conversion_rate)
            .then(|| better.id.clone());

        debug!(
            "A/B {} vs {}: z={:.3} p={:.4} winner={:?}",
            a_stats.id, b_stats.id, z, p_value, winner_id
        );

        AbTestResult {
            a: a_stats,
            b: b_stats,
            winner_id,
            z_score: z,
            p_value,
            confidence: 1.0 - p_value,
            lift,
            significant,
            sufficient_sample,
        }
    }

    /// Compare two or more variants. The variant with the highest conversion
    /// rate wins only if it beats every other variant on its own.
    pub fn evaluate_group(&self, variants: &[CampaignVariant]) -> Result<GroupResult, EngineError> {
        if variants.len() < 2 {
            return Err(EngineError::Config(format!(
                "A/B evaluation needs at least two variants, got {}",
                variants.len()
            )));
        }

        let (leader_index, leader) = variants
            .iter()
            .enumerate()
            .max_by(|(_, x), (_, y)| x.conversion_rate().total_cmp(&y.conversion_rate()))
            .ok_or_else(|| EngineError::Config("no variants to evaluate".to_string()))?;

        let comparisons: Vec<AbTestResult> = variants
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != leader_index)
            .map(|(_, other)| self.evaluate(other, leader))
            .collect();

        let beats_all = comparisons
            .iter()
            .all(|c| c.winner_id.as_deref() == Some(leader.id.as_str()));
        let p_value = comparisons.iter().map(|c| c.p_value).fold(0.0, f64::max);

        Ok(GroupResult {
            leader_id: leader.id.clone(),
            winner_id: beats_all.then(|| leader.id.clone()),
            p_value,
            confidence: 1.0 - p_value,
            comparisons,
        })
    }

    /// Deterministically assign a user to one of `variants` with an even
    /// split. The same user always lands on the same variant of a given
    /// test; different tests bucket independently.
    pub fn assign_variant<'a>(
        &self,
        test_id: &str,
        user_id: &str,
        variants: &'a [CampaignVariant],
    ) -> Option<&'a CampaignVariant> {
        if variants.is_empty() {
            return None;
        }
        let even = vec![1.0 / variants.len() as f64; variants.len()];
        variants.get(weighted_index(assignment_point(test_id, user_id), &even))
    }
}

/// Stable point in `[0, 1)` for a user within one test
pub fn assignment_point(test_id: &str, user_id: &str) -> f64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(test_id.as_bytes());
    hasher.update(b":");
    hasher.update(user_id.as_bytes());
    let hash = hasher.finalize();

    let mut bucket = [0u8; 8];
    bucket.copy_from_slice(&hash.as_bytes()[..8]);
    // Top 53 bits give an exactly representable fraction
    (u64::from_le_bytes(bucket) >> 11) as f64 / (1u64 << 53) as f64
}

/// Index of the bucket `point` falls into, for weights that sum to 1.
/// Rounding slack at the top end goes to the last bucket.
pub(crate) fn weighted_index(point: f64, weights: &[f64]) -> usize {
    let mut cumulative = 0.0;
    for (index, weight) in weights.iter().enumerate() {
        cumulative += weight;
        if point < cumulative {
            return index;
        }
    }
    weights.len().saturating_sub(1)
}

/// Pooled two-proportion z statistic, positive when `b` converts better.
/// Zero when either sample is empty or the pooled rate is 0 or 1.
pub fn z_score(conv_a: u64, n_a: u64, conv_b: u64, n_b: u64) -> f64 {
    if n_a == 0 || n_b == 0 {
        return 0.0;
    }
    let (n_a, n_b) = (n_a as f64, n_b as f64);
    let p_a = conv_a as f64 / n_a;
    let p_b = conv_b as f64 / n_b;
    let pooled = (conv_a + conv_b) as f64 / (n_a + n_b);

    let se = (pooled * (1.0 - pooled) * (1.0 / n_a + 1.0 / n_b)).sqrt();
    if se == 0.0 || !se.is_finite() {
        return 0.0;
    }
    (p_b - p_a) / se
}

/// Two-sided p-value of a standard normal statistic
pub fn two_sided_p_value(z: f64) -> f64 {
    erfc(z.abs() / std::f64::consts::SQRT_2).clamp(0.0, 1.0)
}

/// Complementary error function, Numerical Recipes `erfcc` (|error| < 1.2e-7)
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let r = t * poly.exp();
    if x >= 0.0 {
        r
    } else {
        2.0 - r
    }
}
