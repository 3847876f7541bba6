//! Resource ledger
//!
//! Tracks dollar and token spend against fixed budgets. Every AI call first
//! takes a pessimistic [`Reservation`] sized from the prompt estimate plus the
//! completion cap; once the provider answers, the reservation is committed with
//! the real usage, or released if the call failed.
//!
//! All bookkeeping happens under one mutex, so concurrent reservations can
//! never jointly exceed the budget. Amounts are kept internally as integer
//! nano-dollars so that a reserve followed by a release restores the ledger
//! exactly.
//!
//! A reservation that is dropped without being committed or released (for
//! example because the task holding it was cancelled) gives its amount back
//! automatically.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LedgerConfig;

const NANOS_PER_USD: f64 = 1_000_000_000.0;

fn to_nanos(usd: f64) -> u64 {
    if usd.is_finite() && usd > 0.0 {
        (usd * NANOS_PER_USD).round() as u64
    } else {
        0
    }
}

fn to_usd(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_USD
}

/// One completed provider call, as charged to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub timestamp: DateTime<Utc>,
}

impl UsageEvent {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Point-in-time view of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub budget_usd: f64,
    pub budget_tokens: u64,
    pub spent_usd: f64,
    pub spent_tokens: u64,
    pub reserved_usd: f64,
    pub reserved_tokens: u64,
    pub outstanding_reservations: usize,
}

impl LedgerSnapshot {
    pub fn remaining_usd(&self) -> f64 {
        (self.budget_usd - self.spent_usd - self.reserved_usd).max(0.0)
    }

    pub fn remaining_tokens(&self) -> u64 {
        self.budget_tokens
            .saturating_sub(self.spent_tokens)
            .saturating_sub(self.reserved_tokens)
    }
}

/// Signal returned by a commit that pushed spend past the warning ratio
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetNearlyExceeded {
    pub spent_usd: f64,
    pub budget_usd: f64,
    pub spent_tokens: u64,
    pub budget_tokens: u64,
    /// Actual usage overshot the budget itself
    pub over_budget: bool,
}

/// Aggregated usage for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

/// Totals reported by `hive usage`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub average_cost_per_request: f64,
    pub by_provider: BTreeMap<String, ProviderUsage>,
    pub ledger: LedgerSnapshot,
}

struct LedgerState {
    budget_nanos: u64,
    budget_tokens: u64,
    warn_ratio: f64,
    spent_nanos: u64,
    spent_tokens: u64,
    reserved_nanos: u64,
    reserved_tokens: u64,
    outstanding: HashMap<u64, (u64, u64)>,
    next_id: u64,
    events: VecDeque<UsageEvent>,
    event_capacity: usize,
    total_requests: u64,
    by_provider: BTreeMap<String, ProviderUsage>,
}

impl LedgerState {
    fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            budget_usd: to_usd(self.budget_nanos),
            budget_tokens: self.budget_tokens,
            spent_usd: to_usd(self.spent_nanos),
            spent_tokens: self.spent_tokens,
            reserved_usd: to_usd(self.reserved_nanos),
            reserved_tokens: self.reserved_tokens,
            outstanding_reservations: self.outstanding.len(),
        }
    }

    /// Give back an outstanding reservation. Unknown ids are ignored.
    fn refund(&mut self, id: u64) -> bool {
        match self.outstanding.remove(&id) {
            Some((tokens, nanos)) => {
                self.reserved_tokens = self.reserved_tokens.saturating_sub(tokens);
                self.reserved_nanos = self.reserved_nanos.saturating_sub(nanos);
                true
            }
            None => false,
        }
    }
}

/// Pessimistic hold on part of the budget.
///
/// Consumed by [`ResourceLedger::commit`] or [`ResourceLedger::release`];
/// dropping it unsettled releases it.
pub struct Reservation {
    id: u64,
    tokens: u64,
    cost_nanos: u64,
    state: Arc<Mutex<LedgerState>>,
    settled: bool,
}

impl Reservation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    pub fn cost_usd(&self) -> f64 {
        to_usd(self.cost_nanos)
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("id", &self.id)
            .field("tokens", &self.tokens)
            .field("cost_usd", &self.cost_usd())
            .field("settled", &self.settled)
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled && self.state.lock().refund(self.id) {
            debug!(
                "Reservation {} dropped unsettled, released {} tokens",
                self.id, self.tokens
            );
        }
    }
}

/// Shared budget ledger. Cloning yields another handle onto the same ledger.
#[derive(Clone)]
pub struct ResourceLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl ResourceLedger {
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                budget_nanos: to_nanos(config.budget_usd),
                budget_tokens: config.budget_tokens,
                warn_ratio: config.warn_ratio,
                spent_nanos: 0,
                spent_tokens: 0,
                reserved_nanos: 0,
                reserved_tokens: 0,
                outstanding: HashMap::new(),
                next_id: 1,
                events: VecDeque::new(),
                event_capacity: config.usage_log_capacity.max(1),
                total_requests: 0,
                by_provider: BTreeMap::new(),
            })),
        }
    }

    /// Hold `tokens` and `cost_usd` against the budget.
    ///
    /// Fails with `ResourceExhausted` when the hold would push spent plus
    /// reserved amounts past either budget; the ledger is unchanged then.
    pub fn reserve(&self, tokens: u64, cost_usd: f64) -> Result<Reservation, EngineError> {
        let cost_nanos = to_nanos(cost_usd);
        let mut state = self.state.lock();

        // Overflow counts as over budget
        let fits_usd = state
            .spent_nanos
            .checked_add(state.reserved_nanos)
            .and_then(|committed| committed.checked_add(cost_nanos))
            .is_some_and(|total| total <= state.budget_nanos);
        let fits_tokens = state
            .spent_tokens
            .checked_add(state.reserved_tokens)
            .and_then(|committed| committed.checked_add(tokens))
            .is_some_and(|total| total <= state.budget_tokens);

        if !fits_usd || !fits_tokens {
            let snapshot = state.snapshot();
            warn!(
                "Reservation of {} tokens / ${:.6} refused: {} tokens / ${:.6} remaining",
                tokens,
                cost_usd,
                snapshot.remaining_tokens(),
                snapshot.remaining_usd()
            );
            return Err(EngineError::ResourceExhausted {
                needed_tokens: tokens,
                needed_usd: cost_usd,
                remaining_tokens: snapshot.remaining_tokens(),
                remaining_usd: snapshot.remaining_usd(),
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        state.reserved_nanos += cost_nanos;
        state.reserved_tokens += tokens;
        state.outstanding.insert(id, (tokens, cost_nanos));

        debug!("Reserved {} tokens / ${:.6} as #{}", tokens, cost_usd, id);

        Ok(Reservation {
            id,
            tokens,
            cost_nanos,
            state: Arc::clone(&self.state),
            settled: false,
        })
    }

    /// Replace a reservation with the actual usage.
    ///
    /// Never fails. Returns a warning when spend after the commit reaches the
    /// configured warning ratio of either budget.
    pub fn commit(
        &self,
        mut reservation: Reservation,
        event: UsageEvent,
    ) -> Option<BudgetNearlyExceeded> {
        reservation.settled = true;
        let mut state = reservation.state.lock();
        state.refund(reservation.id);

        state.spent_nanos = state.spent_nanos.saturating_add(to_nanos(event.cost_usd));
        state.spent_tokens = state.spent_tokens.saturating_add(event.total_tokens());
        state.total_requests += 1;

        let provider = state.by_provider.entry(event.provider.clone()).or_default();
        provider.requests += 1;
        provider.prompt_tokens = provider.prompt_tokens.saturating_add(event.prompt_tokens);
        provider.completion_tokens = provider
            .completion_tokens
            .saturating_add(event.completion_tokens);
        provider.cost_usd += event.cost_usd;

        if state.events.len() >= state.event_capacity {
            state.events.pop_front();
        }
        state.events.push_back(event);

        let usd_ratio = ratio(state.spent_nanos, state.budget_nanos);
        let token_ratio = ratio(state.spent_tokens, state.budget_tokens);

        if usd_ratio >= state.warn_ratio || token_ratio >= state.warn_ratio {
            let warning = BudgetNearlyExceeded {
                spent_usd: to_usd(state.spent_nanos),
                budget_usd: to_usd(state.budget_nanos),
                spent_tokens: state.spent_tokens,
                budget_tokens: state.budget_tokens,
                over_budget: usd_ratio > 1.0 || token_ratio > 1.0,
            };
            warn!(
                "Budget nearly exceeded: ${:.4}/${:.4}, {}/{} tokens",
                warning.spent_usd, warning.budget_usd, warning.spent_tokens, warning.budget_tokens
            );
            return Some(warning);
        }

        None
    }

    /// Give a reservation back untouched
    pub fn release(&self, mut reservation: Reservation) {
        reservation.settled = true;
        reservation.state.lock().refund(reservation.id);
        debug!("Released reservation #{}", reservation.id);
    }

    /// Zero the spend counters and usage history. Outstanding reservations
    /// stay held until they are settled.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.spent_nanos = 0;
        state.spent_tokens = 0;
        state.total_requests = 0;
        state.events.clear();
        state.by_provider.clear();
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.state.lock().snapshot()
    }

    /// Most recent usage events, oldest first
    pub fn recent_events(&self, limit: usize) -> Vec<UsageEvent> {
        let state = self.state.lock();
        let skip = state.events.len().saturating_sub(limit);
        state.events.iter().skip(skip).cloned().collect()
    }

    pub fn usage_stats(&self) -> UsageStats {
        let state = self.state.lock();
        let (prompt, completion) = state.by_provider.values().fold((0u64, 0u64), |(p, c), usage| {
            (
                p.saturating_add(usage.prompt_tokens),
                c.saturating_add(usage.completion_tokens),
            )
        });
        let cost = to_usd(state.spent_nanos);

        UsageStats {
            total_requests: state.total_requests,
            total_prompt_tokens: prompt,
            total_completion_tokens: completion,
            total_tokens: prompt.saturating_add(completion),
            total_cost_usd: cost,
            average_cost_per_request: if state.total_requests == 0 {
                0.0
            } else {
                cost / state.total_requests as f64
            },
            by_provider: state.by_provider.clone(),
            ledger: state.snapshot(),
        }
    }
}

fn ratio(spent: u64, budget: u64) -> f64 {
    if budget == 0 {
        if spent == 0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        spent as f64 / budget as f64
    }
}
