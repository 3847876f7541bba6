use chrono::Utc;
use hive_engine::ab_testing::{two_sided_p_value, z_score, AbEvaluator};
use hive_engine::ai::{ResourceLedger, UsageEvent};
use hive_engine::config::{AbTestingConfig, Config, LedgerConfig};
use hive_engine::knowledge::{cosine_similarity, HashingEmbedder};
use hive_engine::llm::extract_json;
use hive_engine::memory::{ConversationMemory, ConversationTurn};
use proptest::prelude::*;
use sdk::types::CampaignVariant;
use serde_json::json;

#[derive(Debug, Clone)]
enum LedgerOp {
    Reserve { tokens: u64, cents: u64 },
    Commit { tokens: u64, cents: u64 },
    Release,
}

fn ledger_op() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        (1..400u64, 0..50u64).prop_map(|(tokens, cents)| LedgerOp::Reserve { tokens, cents }),
        (0..400u64, 0..50u64).prop_map(|(tokens, cents)| LedgerOp::Commit { tokens, cents }),
        Just(LedgerOp::Release),
    ]
}

// Reserved plus spent never exceeds either budget while reservations are
// only settled with at most the amount they reserved.
proptest! {
    #[test]
    fn test_ledger_never_overcommits(ops in prop::collection::vec(ledger_op(), 1..60)) {
        let ledger = ResourceLedger::new(&LedgerConfig {
            budget_usd: 2.0,
            budget_tokens: 2_000,
            warn_ratio: 0.9,
            usage_log_capacity: 100,
        });
        let mut held = Vec::new();

        for op in ops {
            match op {
                LedgerOp::Reserve { tokens, cents } => {
                    if let Ok(r) = ledger.reserve(tokens, cents as f64 / 100.0) {
                        held.push(r);
                    }
                }
                LedgerOp::Commit { tokens, cents } => {
                    if let Some(r) = held.pop() {
                        let tokens = tokens.min(r.tokens());
                        let cost = (cents as f64 / 100.0).min(r.cost_usd());
                        ledger.commit(r, UsageEvent {
                            request_id: "r".to_string(),
                            provider: "p".to_string(),
                            model: "m".to_string(),
                            prompt_tokens: tokens,
                            completion_tokens: 0,
                            cost_usd: cost,
                            timestamp: Utc::now(),
                        });
                    }
                }
                LedgerOp::Release => {
                    if let Some(r) = held.pop() {
                        ledger.release(r);
                    }
                }
            }

            let s = ledger.snapshot();
            prop_assert!(s.spent_tokens + s.reserved_tokens <= s.budget_tokens);
            prop_assert!(s.spent_usd + s.reserved_usd <= s.budget_usd + 1e-9);
            prop_assert_eq!(s.outstanding_reservations, held.len());
        }

        drop(held);
        prop_assert_eq!(ledger.snapshot().reserved_tokens, 0);
    }
}

// Memory keeps at most max_turns, and they are always the most recent ones.
proptest! {
    #[test]
    fn test_memory_keeps_latest_turns(max_turns in 1..20usize, count in 0..60usize) {
        let memory = ConversationMemory::with_max_turns(max_turns);
        for i in 0..count {
            memory.append("c", ConversationTurn::user("c", format!("turn {}", i)));
        }

        let context = memory.get_context("c");
        prop_assert_eq!(context.len(), count.min(max_turns));
        let first_kept = count.saturating_sub(max_turns);
        for (offset, turn) in context.iter().enumerate() {
            prop_assert_eq!(&turn.content, &format!("turn {}", first_kept + offset));
        }
    }
}

// The z statistic is antisymmetric and the p-value is a probability.
proptest! {
    #[test]
    fn test_z_score_symmetry(
        n_a in 1..5_000u64,
        n_b in 1..5_000u64,
        ra in 0.0..=1.0f64,
        rb in 0.0..=1.0f64,
    ) {
        let c_a = (n_a as f64 * ra) as u64;
        let c_b = (n_b as f64 * rb) as u64;

        let forward = z_score(c_a, n_a, c_b, n_b);
        let backward = z_score(c_b, n_b, c_a, n_a);
        prop_assert!((forward + backward).abs() < 1e-9);

        let p = two_sided_p_value(forward);
        prop_assert!((0.0..=1.0).contains(&p));
        prop_assert!((p - two_sided_p_value(backward)).abs() < 1e-12);
    }
}

// A declared winner always has the higher rate, a significant p-value and
// enough impressions on both sides.
proptest! {
    #[test]
    fn test_winner_requires_significance_and_sample(
        n_a in 0..3_000u64,
        n_b in 0..3_000u64,
        ra in 0.0..=0.5f64,
        rb in 0.0..=0.5f64,
    ) {
        let config = AbTestingConfig::default();
        let evaluator = AbEvaluator::new(&config);
        let a = CampaignVariant::new("a", "g", json!({}))
            .with_counts(n_a, (n_a as f64 * ra) as u64);
        let b = CampaignVariant::new("b", "g", json!({}))
            .with_counts(n_b, (n_b as f64 * rb) as u64);

        let result = evaluator.evaluate(&a, &b);
        if let Some(winner) = &result.winner_id {
            prop_assert!(result.p_value < config.significance_threshold);
            prop_assert!(n_a >= config.min_sample_size && n_b >= config.min_sample_size);
            let (w, l) = if winner == "a" { (&a, &b) } else { (&b, &a) };
            prop_assert!(w.conversion_rate() > l.conversion_rate());
        }
        prop_assert!((result.confidence + result.p_value - 1.0).abs() < 1e-12);
    }
}

// Hashing embeddings are deterministic and unit length unless every token
// cancelled out.
proptest! {
    #[test]
    fn test_hashing_embedding_properties(text in "[a-z]{1,12}( [a-z]{1,12}){0,8}") {
        let embedder = HashingEmbedder::new(256);
        let v1 = embedder.embed_sync(&text);
        let v2 = embedder.embed_sync(&text);
        prop_assert_eq!(&v1, &v2);
        prop_assert_eq!(v1.len(), 256);

        let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            prop_assert!((norm - 1.0).abs() < 1e-4);
            prop_assert!((cosine_similarity(&v1, &v2) - 1.0).abs() < 1e-4);
        }
    }
}

// A JSON object survives being wrapped in a code fence or prose.
proptest! {
    #[test]
    fn test_extract_json_from_wrapped_output(
        key in "[a-z]{1,10}",
        value in "[a-zA-Z0-9 ]{0,20}",
        prefix in "[a-zA-Z ,.]{0,30}",
    ) {
        let object = json!({ key.clone(): value.clone() });
        let raw = object.to_string();

        prop_assert_eq!(extract_json(&raw), Some(object.clone()));
        prop_assert_eq!(extract_json(&format!("```json\n{}\n```", raw)), Some(object.clone()));
        prop_assert_eq!(extract_json(&format!("{} {}", prefix, raw)), Some(object));
    }
}

// Configuration survives a TOML round trip
proptest! {
    #[test]
    fn test_config_parsing_round_trip(
        log_level in "error|warn|info|debug|trace",
        default_provider in "ollama|openai|anthropic",
        budget_usd in 0.0..1000.0f64,
        budget_tokens in 1..10_000_000u64,
        threshold in 0.001..0.5f64,
        max_turns in 1..100usize,
    ) {
        let mut config = Config::default();
        config.core.persistence = "memory".to_string();
        config.core.log_level = log_level;
        config.llm.default_provider = default_provider;
        config.ledger.budget_usd = budget_usd;
        config.ledger.budget_tokens = budget_tokens;
        config.ab_testing.significance_threshold = threshold;
        config.memory.max_turns = max_turns;

        let toml_str = toml::to_string(&config).expect("Failed to serialize config");
        let parsed = Config::from_toml_str(&toml_str).expect("Failed to parse config");

        prop_assert_eq!(parsed.core.log_level, config.core.log_level);
        prop_assert_eq!(parsed.llm.default_provider, config.llm.default_provider);
        prop_assert_eq!(parsed.ledger.budget_tokens, config.ledger.budget_tokens);
        prop_assert!((parsed.ledger.budget_usd - config.ledger.budget_usd).abs() < 1e-9);
        prop_assert!((parsed.ab_testing.significance_threshold - threshold).abs() < 1e-12);
        prop_assert_eq!(parsed.memory.max_turns, max_turns);
    }
}
