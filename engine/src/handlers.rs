//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Execute a workflow
//! - status: Show agents, budget and knowledge
//! - usage: Aggregate persisted AI usage
//! - history: Show recent workflow runs
//! - ab-test: Compare two variants
//! - knowledge: Search the knowledge base
//! - config: Show the effective configuration

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use sdk::errors::HiveErrorExt;
use sdk::types::{CampaignVariant, TaskStatus};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::ai::{ProviderUsage, UsageEvent};
use crate::config::Config;
use crate::hive::{open_store, Hive};
use crate::knowledge::KnowledgeStore;
use crate::orchestrator::{WorkflowRun, WorkflowSummary};
use crate::store::{Filter, USAGE_EVENTS, WORKFLOW_RUNS};

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Build the workflow input from `--data` and `--user-id`
pub fn workflow_input(data: Option<&str>, user_id: Option<&str>) -> Result<Value> {
    let mut input = match data {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw).context("--data is not valid JSON")?;
            match value {
                Value::Object(map) => map,
                _ => anyhow::bail!("--data must be a JSON object"),
            }
        }
        None => Map::new(),
    };
    if let Some(user_id) = user_id {
        input.insert("user_id".to_string(), json!(user_id));
    }
    Ok(Value::Object(input))
}

/// Execute a workflow and print its summary
pub async fn handle_run(
    workflow: &str,
    data: Option<&str>,
    user_id: Option<&str>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let input = workflow_input(data, user_id)?;
    let hive = Hive::from_config(config)
        .await
        .context("Failed to assemble hive")?;

    let summary = match hive.execute_workflow(workflow, input).await {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Hint: {}", e.user_hint());
            return Err(e).context(format!("Workflow '{}' could not start", workflow));
        }
    };
    let usage = hive.get_ai_usage_stats();

    match format {
        OutputFormat::Text => {
            print_summary(&summary);
            println!();
            println!(
                "AI usage: {} requests, {} tokens, ${:.4}",
                usage.total_requests, usage.total_tokens, usage.total_cost_usd
            );
        }
        OutputFormat::Json => print_json(&json!({
            "summary": summary,
            "usage": usage,
        }))?,
    }

    if let Some((task_id, error)) = summary.first_error().filter(|_| !summary.success) {
        anyhow::bail!("Workflow {} failed at {}: {}", summary.workflow_id, task_id, error.message);
    }
    Ok(())
}

fn print_summary(summary: &WorkflowSummary) {
    let verdict = if summary.success { "succeeded" } else { "failed" };
    println!(
        "Workflow {} ({}) {} in {}ms",
        summary.workflow_id, summary.workflow_type, verdict, summary.execution_time_ms
    );
    println!("Bees involved: {}", summary.bees_involved.join(", "));
    println!();

    for (task_id, outcome) in &summary.tasks {
        println!("  {} [{}]", task_id, outcome.status.as_str());
        if let Some(ms) = outcome.duration_ms {
            println!("    Duration: {}ms", ms);
        }
        if let Some(error) = &outcome.error {
            println!("    Error ({}): {}", error.kind, error.message);
        }
    }

    let Some(campaign) = &summary.final_result else {
        return;
    };
    println!();
    if let Some(name) = campaign.pointer("/strategy/campaign_name").and_then(Value::as_str) {
        println!("Campaign: {}", name);
    }
    let variants: Vec<CampaignVariant> = campaign
        .get("variants")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    for variant in variants {
        let headline = variant
            .content
            .pointer("/ad_copy/headline")
            .and_then(Value::as_str)
            .unwrap_or("(no headline)");
        println!("  {}: {}", variant.id, headline);
    }
}

/// Show the state of a freshly assembled hive and its provider
pub async fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let hive = Hive::from_config(config)
        .await
        .context("Failed to assemble hive")?;
    let status = hive.get_system_status();
    let healthy = hive.ai().check_health().await;
    let runs = hive.recent_runs(usize::MAX).await?;
    let succeeded = runs.iter().filter(|r| r.success).count();

    match format {
        OutputFormat::Text => {
            println!("Hive v{} ({} persistence)", status.version, status.persistence);
            println!(
                "Provider: {} / {} ({})",
                status.ai.provider,
                status.ai.model,
                if healthy { "available" } else { "unavailable" }
            );
            println!();
            println!("Queen: {}", status.orchestrator.queen_id);
            println!("Workflows: {}", status.orchestrator.workflows.join(", "));
            println!(
                "Recorded runs: {} ({} succeeded, {} failed)",
                runs.len(),
                succeeded,
                runs.len() - succeeded
            );
            println!("Agents ({}):", status.orchestrator.total_agents);
            for agent in &status.orchestrator.agents {
                println!("  {} [{}] {}", agent.id, agent.capability, agent.state.as_str());
            }
            println!();
            println!(
                "Budget: ${:.2} / {} tokens",
                status.ledger.budget_usd, status.ledger.budget_tokens
            );
            println!(
                "Knowledge: {} entries via {}",
                status.knowledge.total_entries, status.knowledge.embedding_provider
            );
        }
        OutputFormat::Json => print_json(&json!({
            "status": status,
            "provider_healthy": healthy,
            "recorded_runs": runs.len(),
            "recorded_successes": succeeded,
        }))?,
    }

    Ok(())
}

/// Totals over persisted usage events
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct UsageReport {
    pub requests: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub by_provider: BTreeMap<String, ProviderUsage>,
}

pub fn summarize_usage(events: &[UsageEvent]) -> UsageReport {
    let mut report = UsageReport::default();
    for event in events {
        report.requests += 1;
        report.total_tokens += event.total_tokens();
        report.cost_usd += event.cost_usd;

        let provider = report.by_provider.entry(event.provider.clone()).or_default();
        provider.requests += 1;
        provider.prompt_tokens += event.prompt_tokens;
        provider.completion_tokens += event.completion_tokens;
        provider.cost_usd += event.cost_usd;
    }
    report
}

/// Aggregate every persisted usage event
pub async fn handle_usage(config: &Config, format: OutputFormat) -> Result<()> {
    let store = open_store(config).await?;
    let events: Vec<UsageEvent> = store
        .query(USAGE_EVENTS, &Filter::new())
        .await?
        .into_iter()
        .map(serde_json::from_value)
        .collect::<std::result::Result<_, _>>()
        .context("Corrupt usage event in store")?;
    let report = summarize_usage(&events);

    match format {
        OutputFormat::Text => {
            if report.requests == 0 {
                println!("No AI usage recorded");
                return Ok(());
            }
            println!(
                "AI usage: {} requests, {} tokens, ${:.4}",
                report.requests, report.total_tokens, report.cost_usd
            );
            for (name, usage) in &report.by_provider {
                println!(
                    "  {}: {} requests, {} prompt + {} completion tokens, ${:.4}",
                    name, usage.requests, usage.prompt_tokens, usage.completion_tokens, usage.cost_usd
                );
            }
        }
        OutputFormat::Json => print_json(&report)?,
    }

    Ok(())
}

/// Show the most recent workflow runs
pub async fn handle_history(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let store = open_store(config).await?;
    let runs: Vec<WorkflowRun> = store
        .query(WORKFLOW_RUNS, &Filter::new().limit(limit))
        .await?
        .into_iter()
        .map(serde_json::from_value)
        .collect::<std::result::Result<_, _>>()
        .context("Corrupt workflow run in store")?;

    match format {
        OutputFormat::Text => {
            if runs.is_empty() {
                println!("No workflow runs in history");
                return Ok(());
            }

            println!("Workflow History (last {} runs):", limit);
            println!();

            for run in runs {
                println!("Run ID: {}", run.id);
                println!("  Workflow: {}", run.workflow_type);
                println!("  Success: {}", run.success);
                println!("  Started: {}", run.started_at.format("%Y-%m-%d %H:%M:%S"));
                println!("  Duration: {}ms", run.execution_time_ms());
                let done = run
                    .tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Done)
                    .count();
                println!("  Tasks: {}/{} done", done, run.tasks.len());
                println!();
            }
        }
        OutputFormat::Json => print_json(&json!({
            "runs": runs,
            "count": runs.len(),
            "limit": limit,
        }))?,
    }

    Ok(())
}

pub struct AbTestArgs {
    pub a_id: String,
    pub a_impressions: u64,
    pub a_conversions: u64,
    pub b_id: String,
    pub b_impressions: u64,
    pub b_conversions: u64,
}

/// Compare two variants from raw counts
pub fn handle_ab_test(args: AbTestArgs, config: &Config, format: OutputFormat) -> Result<()> {
    if args.a_conversions > args.a_impressions || args.b_conversions > args.b_impressions {
        anyhow::bail!("conversions cannot exceed impressions");
    }

    let evaluator = crate::ab_testing::AbEvaluator::new(&config.ab_testing);
    let a = CampaignVariant::new(args.a_id, "cli", Value::Null)
        .with_counts(args.a_impressions, args.a_conversions);
    let b = CampaignVariant::new(args.b_id, "cli", Value::Null)
        .with_counts(args.b_impressions, args.b_conversions);
    let result = evaluator.evaluate(&a, &b);

    match format {
        OutputFormat::Text => {
            for v in [&result.a, &result.b] {
                println!(
                    "{}: {}/{} ({:.2}%)",
                    v.id,
                    v.conversions,
                    v.impressions,
                    v.conversion_rate * 100.0
                );
            }
            println!("z = {:.3}, p = {:.4}", result.z_score, result.p_value);
            match &result.winner_id {
                Some(winner) => println!(
                    "Winner: {} ({:.1}% confidence)",
                    winner,
                    result.confidence * 100.0
                ),
                None if !result.sufficient_sample => println!(
                    "No winner: each variant needs at least {} impressions",
                    evaluator.min_sample_size()
                ),
                None => println!(
                    "No winner: p >= {}",
                    evaluator.significance_threshold()
                ),
            }
        }
        OutputFormat::Json => print_json(&result)?,
    }

    Ok(())
}

/// Search the seeded knowledge base
pub async fn handle_knowledge_search(
    query: &str,
    k: Option<usize>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let knowledge = base_knowledge(config).await?;
    let hits = knowledge
        .query(query, k.unwrap_or_else(|| knowledge.default_k()))
        .await?;

    match format {
        OutputFormat::Text => {
            if hits.is_empty() {
                println!("No knowledge matches '{}'", query);
                return Ok(());
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "[{}] {:.3} ({})",
                    i + 1,
                    hit.similarity,
                    hit.entry.kind().unwrap_or("untyped")
                );
                println!("    {}", hit.entry.source_text);
            }
        }
        OutputFormat::Json => print_json(&hits)?,
    }

    Ok(())
}

pub async fn handle_knowledge_stats(config: &Config, format: OutputFormat) -> Result<()> {
    let stats = base_knowledge(config).await?.stats();
    match format {
        OutputFormat::Text => {
            println!(
                "{} entries (max {}) via {}",
                stats.total_entries, stats.max_entries, stats.embedding_provider
            );
            for (kind, count) in &stats.by_type {
                println!("  {}: {}", kind, count);
            }
        }
        OutputFormat::Json => print_json(&stats)?,
    }
    Ok(())
}

/// Knowledge store holding only the seeded base entries
async fn base_knowledge(config: &Config) -> Result<KnowledgeStore> {
    let embedder =
        KnowledgeStore::embedder_from_config(&config.knowledge, &config.llm.openai.base_url);
    let knowledge = KnowledgeStore::new(embedder, &config.knowledge);
    knowledge
        .seed_base_knowledge()
        .await
        .context("Failed to seed knowledge base")?;
    Ok(knowledge)
}

pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", toml::to_string_pretty(config)?),
        OutputFormat::Json => print_json(config)?,
    }
    Ok(())
}

pub fn handle_config_path(format: OutputFormat) -> Result<()> {
    let path = Config::default_config_path()?;
    match format {
        OutputFormat::Text => println!("{}", path.display()),
        OutputFormat::Json => print_json(&json!({ "path": path }))?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_workflow_input_merges_user_id() {
        let input = workflow_input(Some(r#"{"products": []}"#), Some("user_9")).unwrap();
        assert_eq!(input, json!({"products": [], "user_id": "user_9"}));

        assert_eq!(workflow_input(None, None).unwrap(), json!({}));
        assert!(workflow_input(Some("[1, 2]"), None).is_err());
        assert!(workflow_input(Some("{not json"), None).is_err());
    }

    #[test]
    fn test_summarize_usage_groups_by_provider() {
        let event = |provider: &str, cost: f64| UsageEvent {
            request_id: uuid::Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            model: "m".to_string(),
            prompt_tokens: 100,
            completion_tokens: 20,
            cost_usd: cost,
            timestamp: Utc::now(),
        };
        let report = summarize_usage(&[
            event("openai", 0.01),
            event("openai", 0.02),
            event("ollama", 0.0),
        ]);

        assert_eq!(report.requests, 3);
        assert_eq!(report.total_tokens, 360);
        assert!((report.cost_usd - 0.03).abs() < 1e-12);
        assert_eq!(report.by_provider["openai"].requests, 2);
        assert_eq!(report.by_provider["ollama"].completion_tokens, 20);
    }

    #[test]
    fn test_ab_test_rejects_impossible_counts() {
        let args = AbTestArgs {
            a_id: "a".into(),
            a_impressions: 10,
            a_conversions: 11,
            b_id: "b".into(),
            b_impressions: 10,
            b_conversions: 1,
        };
        assert!(handle_ab_test(args, &Config::default(), OutputFormat::Json).is_err());
    }
}
