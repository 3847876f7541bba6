//! Persistence boundary
//!
//! The hive stores JSON documents in named collections. The in-memory store
//! backs tests and ephemeral runs; [`SqliteStore`] persists to disk.
//! Queries return the most recently written documents first.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use sdk::errors::EngineError;
use serde_json::Value;

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Collection holding completed workflow runs
pub const WORKFLOW_RUNS: &str = "workflow_runs";
/// Collection holding agent registry records
pub const AGENTS: &str = "agents";
/// Collection holding ledger usage events
pub const USAGE_EVENTS: &str = "usage_events";
/// Collection holding conversation histories
pub const CONVERSATIONS: &str = "conversations";

/// Top-level field equality filter with an optional result limit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    equals: Vec<(String, Value)>,
    limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.equals
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }

    pub fn max_results(&self) -> usize {
        self.limit.unwrap_or(usize::MAX)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name shown in status output
    fn backend(&self) -> &str;

    /// Insert or replace a document
    async fn put(&self, collection: &str, id: &str, doc: &Value) -> Result<(), EngineError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, EngineError>;

    /// Documents matching `filter`, most recently written first
    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, EngineError>;
}

struct StoredDoc {
    id: String,
    body: Value,
    seq: u64,
}

#[derive(Default)]
struct Collections {
    docs: HashMap<String, Vec<StoredDoc>>,
    next_seq: u64,
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Collections>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn put(&self, collection: &str, id: &str, doc: &Value) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let seq = inner.next_seq;

        let docs = inner.docs.entry(collection.to_string()).or_default();
        docs.retain(|d| d.id != id);
        docs.push(StoredDoc {
            id: id.to_string(),
            body: doc.clone(),
            seq,
        });
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, EngineError> {
        Ok(self
            .inner
            .lock()
            .docs
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id))
            .map(|d| d.body.clone()))
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, EngineError> {
        let inner = self.inner.lock();
        let Some(docs) = inner.docs.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<&StoredDoc> = docs.iter().filter(|d| filter.matches(&d.body)).collect();
        matching.sort_by(|a, b| b.seq.cmp(&a.seq));

        Ok(matching
            .into_iter()
            .take(filter.max_results())
            .map(|d| d.body.clone())
            .collect())
    }
}
