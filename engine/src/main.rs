// Hive Ad Agent
// Main entry point for the hive binary

use clap::Parser;
use hive_engine::cli::{Cli, Command, ConfigAction, KnowledgeAction};
use hive_engine::config::Config;
use hive_engine::handlers::{
    handle_ab_test, handle_config_path, handle_config_show, handle_history,
    handle_knowledge_search, handle_knowledge_stats, handle_run, handle_status, handle_usage,
    AbTestArgs, OutputFormat,
};
use hive_engine::telemetry::{init_telemetry_with_level, resolve_log_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log beats core.log_level; RUST_LOG beats both
    init_telemetry_with_level(&resolve_log_level(
        cli.log.as_deref(),
        &config.core.log_level,
    ));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Hive v{} ({} - {})", version, commit, timestamp);

    // Handle commands
    match cli.command {
        Command::Run {
            workflow,
            data,
            user_id,
        } => {
            tracing::info!("Executing workflow: {}", workflow);
            handle_run(
                &workflow,
                data.as_deref(),
                user_id.as_deref(),
                &config,
                format,
            )
            .await
        }

        Command::Status => handle_status(&config, format).await,

        Command::Usage => handle_usage(&config, format).await,

        Command::History { limit } => {
            tracing::info!("Showing last {} runs", limit);
            handle_history(limit, &config, format).await
        }

        Command::AbTest {
            a_id,
            a_impressions,
            a_conversions,
            b_id,
            b_impressions,
            b_conversions,
        } => handle_ab_test(
            AbTestArgs {
                a_id,
                a_impressions,
                a_conversions,
                b_id,
                b_impressions,
                b_conversions,
            },
            &config,
            format,
        ),

        Command::Knowledge { action } => match action {
            KnowledgeAction::Search { query, k } => {
                handle_knowledge_search(&query, k, &config, format).await
            }
            KnowledgeAction::Stats => handle_knowledge_stats(&config, format).await,
        },

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => handle_config_path(format),
        },
    }
}
