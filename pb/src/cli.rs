//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// probatch - batch pipeline for competitive-programming problems
#[derive(Parser)]
#[command(
    name = "pb",
    about = "Fetch, generate, upload, and solve competitive-programming problems in batches",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Acting user name (created on first use)
    #[arg(short, long, global = true, default_value = "default")]
    pub user: String,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create and execute a task batch
    Run {
        /// Problem inputs: URLs, raw ids, or manual markers
        #[arg(value_name = "PROBLEM", required = true)]
        problems: Vec<String>,

        /// Fetch adapter override (default: auto-detect per URL)
        #[arg(long)]
        source: Option<String>,

        /// Upload + submit adapter
        #[arg(long)]
        target: Option<String>,

        /// LLM provider for gen and solve
        #[arg(long, default_value = "deepseek")]
        llm: String,

        /// Skip the fetch stage
        #[arg(long)]
        no_fetch: bool,

        /// Skip test-data generation
        #[arg(long)]
        no_gen: bool,

        /// Skip the upload stage
        #[arg(long)]
        no_upload: bool,

        /// Skip the solve stage
        #[arg(long)]
        no_solve: bool,
    },

    /// List tasks
    List {
        /// Substring filter on the problem id
        #[arg(short, long)]
        search: Option<String>,

        /// Status filter (pending, running, completed, failed)
        #[arg(long)]
        status: Option<String>,

        /// Maximum rows
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Show a task's pipeline log
    Logs {
        /// Task id
        task_id: i64,
    },

    /// Retry a task in place
    Retry {
        /// Task id
        task_id: i64,

        /// Module to re-run (fetch, gen, upload, solve, all)
        #[arg(short, long, default_value = "all")]
        module: String,
    },

    /// Cancel a task
    Cancel {
        /// Task id
        task_id: i64,
    },

    /// Delete a task (artifacts are removed in the background unless AC)
    Delete {
        /// Task id
        task_id: i64,
    },

    /// Download a task's workspace as a ZIP bundle
    Download {
        /// Task id
        task_id: i64,

        /// Output file
        #[arg(short, long, default_value = "workspace.zip")]
        output: PathBuf,
    },

    /// Show task statistics
    Stats,

    /// Store per-user configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Per-user configuration subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Set an adapter config blob (sensitive fields are encrypted at rest)
    SetAdapter {
        /// Adapter name (hydro, codeforces, ...), or `llm` for provider keys
        adapter: String,

        /// JSON object with the configuration
        json: String,
    },

    /// Show an adapter config (decrypted)
    GetAdapter {
        /// Adapter name
        adapter: String,
    },
}
