/// SQLite document store
///
/// Documents live in a single `documents` table keyed by `(collection, id)`.
/// The database runs in WAL mode; call `close()` during shutdown to
/// checkpoint the WAL into the main file.
use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::errors::EngineError;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use super::{DocumentStore, Filter};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoint the WAL and close all connections
    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        self.pool.close().await;
        Ok(())
    }

    async fn put_doc(&self, collection: &str, id: &str, doc: &Value) -> Result<()> {
        let body = serde_json::to_string(doc).context("Failed to serialize document")?;
        let now = chrono::Utc::now().timestamp_millis();

        // REPLACE deletes the old row, so the new one gets a fresh seq
        sqlx::query(
            "INSERT OR REPLACE INTO documents (collection, id, body, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(collection)
        .bind(id)
        .bind(body)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write {}/{}", collection, id))?;

        Ok(())
    }

    async fn get_doc(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to read {}/{}", collection, id))?;

        body.map(|b| serde_json::from_str(&b).context("Corrupt document body"))
            .transpose()
    }

    async fn query_docs(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>> {
        let bodies: Vec<String> = sqlx::query_scalar(
            "SELECT body FROM documents WHERE collection = ? ORDER BY seq DESC",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to query {}", collection))?;

        let limit = filter.max_results();
        let mut results = Vec::new();
        for body in bodies {
            if results.len() >= limit {
                break;
            }
            let doc: Value = serde_json::from_str(&body).context("Corrupt document body")?;
            if filter.matches(&doc) {
                results.push(doc);
            }
        }
        Ok(results)
    }
}

fn db_error(err: anyhow::Error) -> EngineError {
    EngineError::Database(format!("{:#}", err))
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn put(&self, collection: &str, id: &str, doc: &Value) -> Result<(), EngineError> {
        self.put_doc(collection, id, doc).await.map_err(db_error)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, EngineError> {
        self.get_doc(collection, id).await.map_err(db_error)
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>, EngineError> {
        self.query_docs(collection, filter).await.map_err(db_error)
    }
}
