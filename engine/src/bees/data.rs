//! Shopper and market data sources
//!
//! Bees read behavior analytics, product catalogs and social trends through
//! [`DataSource`]. [`SimulatedDataSource`] produces deterministic data derived
//! from the request so workflows can run without external connectors.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBehavior {
    pub user_id: String,
    pub sessions: u32,
    pub page_views: u32,
    pub avg_session_duration_secs: u32,
    pub bounce_rate: f64,
    pub conversions: u32,
    pub revenue: f64,
    pub top_pages: Vec<String>,
    pub devices: BTreeMap<String, f64>,
}

impl UserBehavior {
    pub fn conversion_rate(&self) -> f64 {
        if self.sessions == 0 {
            0.0
        } else {
            f64::from(self.conversions) / f64::from(self.sessions)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub rating: f64,
    pub reviews: u32,
    pub category: String,
    pub in_stock: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingTopic {
    pub topic: String,
    pub volume: u64,
    pub sentiment: String,
}

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn user_behavior(&self, user_id: &str) -> Result<UserBehavior, EngineError>;

    async fn search_products(
        &self,
        keywords: &str,
        max_results: usize,
    ) -> Result<Vec<Product>, EngineError>;

    async fn trending_topics(&self) -> Result<Vec<TrendingTopic>, EngineError>;
}

/// Deterministic stand-in for analytics, catalog and social APIs
#[derive(Debug, Clone, Default)]
pub struct SimulatedDataSource;

impl SimulatedDataSource {
    pub fn new() -> Self {
        Self
    }
}

/// Stream of pseudo-random bytes derived from a key
struct Seeded {
    bytes: [u8; 32],
    pos: usize,
}

impl Seeded {
    fn new(key: &str) -> Self {
        Self {
            bytes: *blake3::hash(key.as_bytes()).as_bytes(),
            pos: 0,
        }
    }

    fn next_u8(&mut self) -> u8 {
        let b = self.bytes[self.pos % self.bytes.len()];
        self.pos += 1;
        b
    }

    /// Inclusive range
    fn range(&mut self, low: u32, high: u32) -> u32 {
        low + u32::from(self.next_u8()) % (high - low + 1)
    }

    fn unit(&mut self) -> f64 {
        f64::from(self.next_u8()) / 255.0
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[async_trait]
impl DataSource for SimulatedDataSource {
    async fn user_behavior(&self, user_id: &str) -> Result<UserBehavior, EngineError> {
        let mut rng = Seeded::new(user_id);
        let sessions = 10 + rng.range(5, 30);
        let page_views = sessions * rng.range(3, 8);

        Ok(UserBehavior {
            user_id: user_id.to_string(),
            sessions,
            page_views,
            avg_session_duration_secs: 120 + rng.range(60, 300),
            bounce_rate: round2(0.2 + rng.unit() * 0.4),
            conversions: rng.range(1, 8),
            revenue: round2(100.0 + rng.unit() * 500.0),
            top_pages: [
                "/products/electronics",
                "/products/books",
                "/cart",
                "/checkout",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            devices: BTreeMap::from([
                ("desktop".to_string(), 0.6),
                ("mobile".to_string(), 0.3),
                ("tablet".to_string(), 0.1),
            ]),
        })
    }

    async fn search_products(
        &self,
        keywords: &str,
        max_results: usize,
    ) -> Result<Vec<Product>, EngineError> {
        let mut rng = Seeded::new(keywords);
        let slug: String = keywords
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();

        Ok((0..max_results)
            .map(|i| Product {
                id: format!("prod_{}_{:03}", slug, i + 1),
                title: format!("{} - Product {}", keywords, i + 1),
                price: round2(29.99 + i as f64 * 15.5),
                rating: (35.0 + rng.unit() * 15.0).round() / 10.0,
                reviews: 50 + i as u32 * 30,
                category: keywords.to_string(),
                in_stock: true,
            })
            .collect())
    }

    async fn trending_topics(&self) -> Result<Vec<TrendingTopic>, EngineError> {
        Ok([
            ("#TechDeals", 15000, "positive"),
            ("#SmartHome", 12000, "neutral"),
            ("#Gadgets2024", 10000, "positive"),
            ("#ShoppingOnline", 8000, "neutral"),
        ]
        .iter()
        .map(|(topic, volume, sentiment)| TrendingTopic {
            topic: topic.to_string(),
            volume: *volume,
            sentiment: sentiment.to_string(),
        })
        .collect())
    }
}
