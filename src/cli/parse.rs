//! CLI parse: clap types for catalog-upgrade. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Runs catalog upgrades and inspects their history
#[derive(Debug, Parser)]
#[command(name = "catalog-upgrade")]
#[command(about = "Run metadata catalog upgrades (bootstrap, reindex, restore indices)")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Name of the upgrade to execute
    #[arg(short = 'u', long = "upgrade")]
    pub upgrade: Option<String>,

    /// Upgrade argument, usually key=value (repeatable)
    #[arg(short = 'a', long = "arg")]
    pub args: Vec<String>,

    /// Workspace root directory (for config/config.toml)
    #[arg(long, default_value = ".", global = true)]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// Enable verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// List registered upgrades and their steps
    List,
    /// Show published upgrade reports, newest first
    History {
        /// Only reports of this upgrade
        #[arg(short = 'u', long = "upgrade")]
        upgrade: Option<String>,
        /// Maximum number of reports
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}
