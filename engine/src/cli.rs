//! CLI interface for Hive
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for driving the hive.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hive Ad Agent
///
/// A multi-agent system that analyzes shoppers and builds ad campaigns with
/// budgeted LLM calls, retrieval-augmented prompts and A/B evaluation.
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a workflow
    Run {
        /// Workflow name, e.g. full_ad_campaign
        workflow: String,

        /// Workflow input as a JSON object
        #[arg(long, value_name = "JSON")]
        data: Option<String>,

        /// Shorthand for --data '{"user_id": "..."}'
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Show agents, workflows, budget and knowledge status
    Status,

    /// Show persisted AI usage and cost
    Usage,

    /// Show workflow run history
    History {
        /// Number of runs to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Compare two campaign variants for a significant difference
    AbTest {
        #[arg(long, default_value = "a")]
        a_id: String,
        #[arg(long)]
        a_impressions: u64,
        #[arg(long)]
        a_conversions: u64,
        #[arg(long, default_value = "b")]
        b_id: String,
        #[arg(long)]
        b_impressions: u64,
        #[arg(long)]
        b_conversions: u64,
    },

    /// Query the knowledge base
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Knowledge base actions
#[derive(Subcommand, Debug)]
pub enum KnowledgeAction {
    /// Search the base knowledge for entries similar to a query
    Search {
        query: String,

        /// Number of results (defaults to knowledge.default_k)
        #[arg(short)]
        k: Option<usize>,
    },

    /// Show entry counts by type
    Stats,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Print the configuration file path
    Path,
}
