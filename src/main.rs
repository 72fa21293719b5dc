//! Radar - resource check coordination
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use radar::cli::{Cli, Commands};
use radar::config::ConfigManager;
use radar::error::RadarResult;
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

async fn run() -> RadarResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("radar=warn"),
        1 => EnvFilter::new("radar=info"),
        _ => EnvFilter::new("radar=debug"),
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
        Commands::Gc(args) => radar::cli::commands::gc(args, &config).await,
        Commands::Status => radar::cli::commands::status(&config).await,
        Commands::Config(args) => {
            radar::cli::commands::config(args, &config_manager, &config).await
        }
    }
}
