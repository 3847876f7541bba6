//! Integration tests for the resource ledger under concurrency
//!
//! Many tasks race to reserve against one ledger; the budget must never be
//! over-committed and every reservation must be settled exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use hive_engine::ai::{ResourceLedger, UsageEvent};
use hive_engine::config::LedgerConfig;
use sdk::errors::EngineError;

fn ledger(budget_usd: f64, budget_tokens: u64) -> ResourceLedger {
    ResourceLedger::new(&LedgerConfig {
        budget_usd,
        budget_tokens,
        warn_ratio: 0.9,
        usage_log_capacity: 1000,
    })
}

fn event(tokens: u64, cost_usd: f64) -> UsageEvent {
    UsageEvent {
        request_id: uuid::Uuid::new_v4().to_string(),
        provider: "scripted".to_string(),
        model: "m".to_string(),
        prompt_tokens: tokens,
        completion_tokens: 0,
        cost_usd,
        timestamp: Utc::now(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_overcommit() {
    // Room for exactly 10 reservations of 100 tokens
    let ledger = ledger(100.0, 1_000);
    let granted = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let ledger = ledger.clone();
        let granted = Arc::clone(&granted);
        let refused = Arc::clone(&refused);
        handles.push(tokio::spawn(async move {
            match ledger.reserve(100, 0.01) {
                Ok(reservation) => {
                    granted.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    let snapshot = ledger.snapshot();
                    assert!(snapshot.reserved_tokens + snapshot.spent_tokens <= 1_000);
                    ledger.commit(reservation, event(100, 0.01));
                }
                Err(EngineError::ResourceExhausted { .. }) => {
                    refused.fetch_add(1, Ordering::SeqCst);
                }
                Err(other) => panic!("unexpected error: {}", other),
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = ledger.snapshot();
    assert_eq!(granted.load(Ordering::SeqCst), 10);
    assert_eq!(refused.load(Ordering::SeqCst), 40);
    assert_eq!(snapshot.spent_tokens, 1_000);
    assert_eq!(snapshot.reserved_tokens, 0);
    assert_eq!(snapshot.outstanding_reservations, 0);
    assert_eq!(ledger.usage_stats().total_requests, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_released_budget_is_reusable() {
    let ledger = ledger(1.0, 500);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            if let Ok(reservation) = ledger.reserve(250, 0.1) {
                tokio::task::yield_now().await;
                ledger.release(reservation);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = ledger.snapshot();
    assert_eq!(snapshot.spent_tokens, 0);
    assert_eq!(snapshot.reserved_tokens, 0);
    assert!(ledger.reserve(500, 1.0).is_ok());
}

#[test]
fn test_dropped_reservation_is_refunded() {
    let ledger = ledger(1.0, 100);
    {
        let _held = ledger.reserve(100, 0.5).unwrap();
        assert!(ledger.reserve(1, 0.0).is_err());
    }
    assert_eq!(ledger.snapshot().outstanding_reservations, 0);
    assert!(ledger.reserve(100, 0.5).is_ok());
}

#[test]
fn test_dollar_budget_is_enforced_independently() {
    let ledger = ledger(0.05, 1_000_000);
    let first = ledger.reserve(10, 0.04).unwrap();
    let err = ledger.reserve(10, 0.02).unwrap_err();
    match err {
        EngineError::ResourceExhausted {
            remaining_usd,
            needed_usd,
            ..
        } => {
            assert!((remaining_usd - 0.01).abs() < 1e-9);
            assert!((needed_usd - 0.02).abs() < 1e-9);
        }
        other => panic!("expected ResourceExhausted, got {:?}", other),
    }

    let warning = ledger.commit(first, event(10, 0.048));
    let warning = warning.expect("0.048 of 0.05 crosses the 0.9 warning ratio");
    assert!(!warning.over_budget);
}
