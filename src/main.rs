//! lifecache CLI
//!
//! Entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use lifecache::cli::{Cli, Commands};
use lifecache::config::ConfigManager;
use lifecache::error::LifecacheResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> LifecacheResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // Config commands must work even when the file is broken
    let config = match (&cli.command, config_manager.load().await) {
        (_, Ok(config)) => config,
        (Commands::Config(_), Err(_)) => Default::default(),
        (_, Err(e)) => return Err(e),
    };

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("lifecache=warn"),
        1 => EnvFilter::new("lifecache=info"),
        _ => EnvFilter::new("lifecache=debug"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.without_time().init();
    }

    match cli.command {
        Commands::Simulate(args) => lifecache::cli::commands::simulate(args, &config).await,
        Commands::Config(args) => {
            lifecache::cli::commands::config(args, &config_manager, &config).await
        }
    }
}
