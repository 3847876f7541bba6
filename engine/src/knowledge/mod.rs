//! Knowledge store (retrieval-augmented generation)
//!
//! Stores text snippets with their embedding vectors and answers similarity
//! queries with cosine similarity. Agents use it to pull segment strategies,
//! benchmarks and learnings from earlier campaigns into new prompts, and feed
//! their own results back in so the base grows over time.
//!
//! Retention is bounded by `max_entries`; the oldest entry is evicted first.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::KnowledgeConfig;

pub mod embedding;

pub use embedding::{cosine_similarity, EmbeddingProvider, HashingEmbedder, OpenAiEmbedder};

/// Free-form metadata attached to an entry (`type`, `segment`, ...)
pub type Metadata = Map<String, Value>;

/// Immutable stored snippet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub embedding: Vec<f32>,
    pub source_text: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn new(source_text: impl Into<String>, embedding: Vec<f32>, metadata: Metadata) -> Self {
        Self {
            id: format!("kn_{}", uuid::Uuid::new_v4().simple()),
            embedding,
            source_text: source_text.into(),
            metadata,
            created_at: Utc::now(),
        }
    }

    /// The `type` metadata field, if set
    pub fn kind(&self) -> Option<&str> {
        self.metadata.get("type").and_then(Value::as_str)
    }
}

/// Query hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub entry: KnowledgeEntry,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeStats {
    pub total_entries: usize,
    pub max_entries: usize,
    pub embedding_provider: String,
    pub by_type: BTreeMap<String, usize>,
}

struct Stored {
    seq: u64,
    entry: KnowledgeEntry,
}

struct Entries {
    items: VecDeque<Stored>,
    next_seq: u64,
}

pub struct KnowledgeStore {
    embedder: Arc<dyn EmbeddingProvider>,
    max_entries: usize,
    default_k: usize,
    entries: RwLock<Entries>,
}

impl KnowledgeStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, config: &KnowledgeConfig) -> Self {
        Self {
            embedder,
            max_entries: config.max_entries.max(1),
            default_k: config.default_k,
            entries: RwLock::new(Entries {
                items: VecDeque::new(),
                next_seq: 0,
            }),
        }
    }

    /// Embedder chosen by `knowledge.embedding`
    pub fn embedder_from_config(
        config: &KnowledgeConfig,
        openai_base_url: &str,
    ) -> Arc<dyn EmbeddingProvider> {
        match config.embedding.as_str() {
            "openai" => Arc::new(OpenAiEmbedder::from_env(
                openai_base_url,
                config.embedding_model.clone(),
            )),
            _ => Arc::new(HashingEmbedder::new(config.dimensions)),
        }
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Store an already embedded entry. Returns its id.
    pub fn insert(&self, entry: KnowledgeEntry) -> String {
        let id = entry.id.clone();
        let mut entries = self.entries.write();
        let seq = entries.next_seq;
        entries.next_seq += 1;

        if entries.items.len() >= self.max_entries {
            if let Some(evicted) = entries.items.pop_front() {
                debug!("Knowledge store full, evicted {}", evicted.entry.id);
            }
        }
        entries.items.push_back(Stored { seq, entry });
        id
    }

    /// Embed `text` and store it
    pub async fn add(&self, text: &str, metadata: Metadata) -> Result<String, EngineError> {
        let embedding = self.embedder.embed(text).await?;
        Ok(self.insert(KnowledgeEntry::new(text, embedding, metadata)))
    }

    /// Up to `k` entries most similar to `text`, best first
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredEntry>, EngineError> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(text).await?;
        Ok(self.query_embedding(&embedding, k))
    }

    /// Rank stored entries against a precomputed vector.
    ///
    /// Ties on similarity go to the most recently created entry.
    pub fn query_embedding(&self, embedding: &[f32], k: usize) -> Vec<ScoredEntry> {
        let entries = self.entries.read();

        let mut scored: Vec<(f32, &Stored)> = entries
            .items
            .iter()
            .map(|stored| (cosine_similarity(embedding, &stored.entry.embedding), stored))
            .collect();

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.entry.created_at.cmp(&a.1.entry.created_at))
                .then_with(|| b.1.seq.cmp(&a.1.seq))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(similarity, stored)| ScoredEntry {
                entry: stored.entry.clone(),
                similarity,
            })
            .collect()
    }

    /// Relevant entries formatted as numbered sources for a prompt.
    /// Empty when nothing is stored.
    pub async fn context_for_prompt(&self, query: &str, k: usize) -> Result<String, EngineError> {
        let hits = self.query(query, k).await?;
        Ok(hits
            .iter()
            .enumerate()
            .map(|(i, hit)| format!("[Source {}]: {}", i + 1, hit.entry.source_text))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// Insert the built-in segment strategies and performance benchmarks
    pub async fn seed_base_knowledge(&self) -> Result<usize, EngineError> {
        let base = base_knowledge();
        let count = base.len();
        for (text, metadata) in base {
            self.add(text, metadata).await?;
        }
        info!("Seeded knowledge store with {} base entries", count);
        Ok(count)
    }

    /// Record what a campaign taught us
    pub async fn add_campaign_learning(
        &self,
        campaign_id: &str,
        learning: &str,
        performance: &Value,
    ) -> Result<String, EngineError> {
        let mut metadata = Metadata::new();
        metadata.insert("type".into(), json!("campaign_learning"));
        metadata.insert("campaign_id".into(), json!(campaign_id));
        for key in ["ctr", "conversion_rate"] {
            if let Some(v) = performance.get(key) {
                metadata.insert(key.into(), v.clone());
            }
        }
        self.add(learning, metadata).await
    }

    /// Record an observation about a shopper segment
    pub async fn add_segment_insight(
        &self,
        segment: &str,
        insight: &str,
    ) -> Result<String, EngineError> {
        let mut metadata = Metadata::new();
        metadata.insert("type".into(), json!("segment_insight"));
        metadata.insert("segment".into(), json!(segment));
        self.add(insight, metadata).await
    }

    pub fn get(&self, id: &str) -> Option<KnowledgeEntry> {
        self.entries
            .read()
            .items
            .iter()
            .find(|s| s.entry.id == id)
            .map(|s| s.entry.clone())
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.items.len();
        entries.items.retain(|s| s.entry.id != id);
        entries.items.len() < before
    }

    pub fn len(&self) -> usize {
        self.entries.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> KnowledgeStats {
        let entries = self.entries.read();
        let mut by_type = BTreeMap::new();
        for stored in &entries.items {
            let kind = stored.entry.kind().unwrap_or("untyped").to_string();
            *by_type.entry(kind).or_insert(0) += 1;
        }
        KnowledgeStats {
            total_entries: entries.items.len(),
            max_entries: self.max_entries,
            embedding_provider: self.embedder.name().to_string(),
            by_type,
        }
    }
}

fn metadata(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

fn base_knowledge() -> Vec<(&'static str, Metadata)> {
    vec![
        (
            "Impulse buyers respond best to urgency messaging like 'Limited Time' and 'Act Now'. \
             They prefer short, direct copy with clear calls-to-action.",
            metadata(&[("type", "segment_strategy"), ("segment", "impulse_buyer")]),
        ),
        (
            "Researchers need detailed information, comparisons, and social proof. \
             Include product specifications, reviews, and ratings in ads.",
            metadata(&[("type", "segment_strategy"), ("segment", "researcher")]),
        ),
        (
            "Bargain hunters are motivated by discounts and savings. \
             Emphasize price reductions, deals, and value propositions prominently.",
            metadata(&[("type", "segment_strategy"), ("segment", "bargain_hunter")]),
        ),
        (
            "Premium buyers value quality over price. \
             Focus on exclusivity, craftsmanship, and premium features in messaging.",
            metadata(&[("type", "segment_strategy"), ("segment", "premium_buyer")]),
        ),
        (
            "Optimal CTR for e-commerce ads ranges from 2-5%. \
             Conversion rates typically fall between 1-3% depending on product category.",
            metadata(&[("type", "performance_benchmark"), ("category", "general")]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store(max_entries: usize) -> KnowledgeStore {
        let config = KnowledgeConfig {
            max_entries,
            ..KnowledgeConfig::default()
        };
        KnowledgeStore::new(Arc::new(HashingEmbedder::new(128)), &config)
    }

    fn entry(text: &str, embedding: Vec<f32>, age_secs: i64) -> KnowledgeEntry {
        let mut e = KnowledgeEntry::new(text, embedding, Metadata::new());
        e.created_at = Utc::now() - Duration::seconds(age_secs);
        e
    }

    #[tokio::test]
    async fn test_empty_store_query_is_empty() {
        let store = store(10);
        assert!(store.query("anything", 5).await.unwrap().is_empty());
        assert_eq!(store.context_for_prompt("anything", 3).await.unwrap(), "");
    }

    #[test]
    fn test_query_orders_by_similarity() {
        let store = store(10);
        store.insert(entry("doc1", vec![1.0, 0.0, 0.0], 0));
        store.insert(entry("doc2", vec![0.0, 1.0, 0.0], 0));
        store.insert(entry("doc3", vec![0.9, 0.1, 0.0], 0));

        let hits = store.query_embedding(&[1.0, 0.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.source_text, "doc1");
        assert_eq!(hits[1].entry.source_text, "doc3");
        assert!(hits[0].similarity > 0.99);
    }

    #[test]
    fn test_ties_prefer_most_recent() {
        let store = store(10);
        store.insert(entry("old", vec![1.0, 0.0], 60));
        store.insert(entry("new", vec![1.0, 0.0], 0));
        store.insert(entry("middle", vec![1.0, 0.0], 30));

        let hits = store.query_embedding(&[1.0, 0.0], 3);
        let order: Vec<_> = hits.iter().map(|h| h.entry.source_text.as_str()).collect();
        assert_eq!(order, vec!["new", "middle", "old"]);
    }

    #[test]
    fn test_k_larger_than_store() {
        let store = store(10);
        store.insert(entry("only", vec![1.0], 0));
        assert_eq!(store.query_embedding(&[1.0], 10).len(), 1);
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let store = store(2);
        let first = store.insert(entry("a", vec![1.0], 0));
        store.insert(entry("b", vec![1.0], 0));
        store.insert(entry("c", vec![1.0], 0));

        assert_eq!(store.len(), 2);
        assert!(store.get(&first).is_none());
    }

    #[tokio::test]
    async fn test_seed_and_context_for_prompt() {
        let store = store(100);
        assert_eq!(store.seed_base_knowledge().await.unwrap(), 5);

        let context = store
            .context_for_prompt("discounts and savings for bargain hunters", 2)
            .await
            .unwrap();
        assert!(context.starts_with("[Source 1]: Bargain hunters"));
        assert!(context.contains("[Source 2]: "));

        let stats = store.stats();
        assert_eq!(stats.by_type["segment_strategy"], 4);
        assert_eq!(stats.embedding_provider, "hashing");
    }

    #[tokio::test]
    async fn test_campaign_learning_metadata() {
        let store = store(10);
        let id = store
            .add_campaign_learning("camp-1", "Urgency beat value framing", &json!({"ctr": 0.04}))
            .await
            .unwrap();

        let stored = store.get(&id).unwrap();
        assert_eq!(stored.kind(), Some("campaign_learning"));
        assert_eq!(stored.metadata["ctr"], json!(0.04));
        assert!(store.delete(&id));
        assert!(store.is_empty());
    }
}
