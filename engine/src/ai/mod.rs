//! Resource-governed AI access
//!
//! [`AiEngine`] is the only path from agents to an LLM provider. It charges
//! every call against the shared [`ResourceLedger`], enforces the request
//! rate limit and keeps per-conversation memory.

pub mod engine;
pub mod ledger;
pub mod rate_limit;

pub use engine::{AiEngine, AiResponse, EngineSettings};
pub use ledger::{
    BudgetNearlyExceeded, LedgerSnapshot, ProviderUsage, Reservation, ResourceLedger, UsageEvent,
    UsageStats,
};
pub use rate_limit::RateLimiter;
