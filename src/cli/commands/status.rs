//! Status command - store row counts

use super::open_store;
use crate::config::{Config, ConfigManager};
use crate::error::RadarResult;
use crate::store::Store;
use console::style;

/// Execute the status command
pub async fn execute(config: &Config) -> RadarResult<()> {
    let store = open_store(config).await?;
    let stats = store.stats().await?;

    println!("{}", style("Radar Store Status").bold().cyan());
    println!(
        "  {} {}",
        style("Database:").bold(),
        ConfigManager::database_path(config).display()
    );
    println!();

    let rows = [
        ("Base resource types", stats.base_resource_types),
        ("Resource configs", stats.resource_configs),
        ("Resource caches", stats.resource_caches),
        ("Resource config uses", stats.resource_config_uses),
        ("Resource cache uses", stats.resource_cache_uses),
        ("Check sessions", stats.check_sessions),
        ("Locks", stats.locks),
    ];
    for (label, count) in rows {
        println!("  {:<22} {}", label, count);
    }

    Ok(())
}
