//! CLI command implementations

pub mod config;
pub mod gc;
pub mod status;

pub use config::execute as config;
pub use gc::execute as gc;
pub use status::execute as status;

use crate::config::{Config, ConfigManager};
use crate::error::RadarResult;
use crate::store::SqliteStore;
use tracing::debug;

/// Open the configured SQLite store
pub(crate) async fn open_store(config: &Config) -> RadarResult<SqliteStore> {
    let path = ConfigManager::database_path(config);
    debug!("Opening store at {}", path.display());
    SqliteStore::connect(&path, &config.store).await
}
