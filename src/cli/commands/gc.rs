//! Gc command - run the garbage collectors

use super::open_store;
use crate::audit::AuditLog;
use crate::cli::args::GcArgs;
use crate::config::Config;
use crate::error::{RadarError, RadarResult};
use crate::gc::{CollectionSummary, CollectorRunner};
use crate::store::Store;
use console::style;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Execute the gc command
pub async fn execute(args: GcArgs, config: &Config) -> RadarResult<()> {
    let store: Arc<dyn Store> = Arc::new(open_store(config).await?);
    let runner = CollectorRunner::new(store, AuditLog::new(config));

    if !args.watch {
        let summary = runner.run_once().await;
        print_summary(&summary);
        return if summary.is_clean() {
            Ok(())
        } else {
            Err(RadarError::User(format!(
                "{} collector(s) failed",
                summary.failed.len()
            )))
        };
    }

    let interval = args
        .interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.gc.interval());
    if interval.is_zero() {
        return Err(RadarError::User("--interval must be at least 1 second".to_string()));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted; finishing current pass");
            let _ = shutdown_tx.send(true);
        }
    });

    println!(
        "{} Collecting every {}s (Ctrl-C to stop)",
        style("→").cyan(),
        interval.as_secs()
    );
    runner.run(interval, shutdown_rx).await;
    Ok(())
}

fn print_summary(summary: &CollectionSummary) {
    for (name, deleted) in &summary.deleted {
        println!("  {} {:<22} {} deleted", style("✓").green(), name, deleted);
    }
    for (name, error) in &summary.failed {
        println!("  {} {:<22} {}", style("✗").red(), name, error);
    }
    println!();
    println!(
        "{}",
        style(format!("{} row(s) collected", summary.total())).bold()
    );
}
