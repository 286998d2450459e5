//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// lifecache - lazily resolved entity cache
///
/// Entities live for a usage-weighted number of life units and are evicted
/// once their budget runs out.
#[derive(Parser, Debug)]
#[command(name = "lifecache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LIFECACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a workload against an in-memory store on a virtual clock
    Simulate(SimulateArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the simulate command
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Key to read (repeatable)
    #[arg(short, long = "key", default_value = "a")]
    pub keys: Vec<String>,

    /// getData calls per key
    #[arg(short, long, default_value_t = 2)]
    pub reads: usize,

    /// Payload stored under every key
    #[arg(short, long, default_value = "ab")]
    pub payload: String,

    /// Extend life on every data operation
    #[arg(long)]
    pub keep: bool,

    /// Life units to advance after the reads (default: until every key expires)
    #[arg(long)]
    pub advance: Option<f64>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., entity.keep)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Output format for the simulation report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one event per line)
    Plain,
}
