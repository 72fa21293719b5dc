//! Garbage collectors
//!
//! Each collector is a stateless pass over the store that can be run again at
//! any time. Use rows must be gone before the configs and caches they point at
//! become deletable, so `CollectorRunner` always runs the use passes first.
//! Deletes race against scanners creating and using the same rows; a delete
//! that loses such a race is a no-op, and the row is reconsidered next pass.

pub mod configs;
pub mod sessions;
pub mod uses;

pub use configs::{CacheCollector, ConfigCollector};
pub use sessions::CheckSessionCollector;
pub use uses::{CacheUseCollector, ConfigUseCollector};

use crate::audit::AuditLog;
use crate::error::{RadarError, RadarResult};
use crate::store::Store;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// One garbage collection pass
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the pass, returning how many rows were deleted
    async fn run(&self) -> RadarResult<usize>;
}

/// Classify the result of a delete that may race a new reference.
///
/// A foreign-key violation means something referenced the rows while we were
/// deleting them; the rows survive and nothing was deleted.
pub fn optimistic_delete<T>(what: &str, result: RadarResult<Vec<T>>) -> RadarResult<Vec<T>> {
    match result {
        Err(RadarError::ForeignKeyViolation(detail)) => {
            debug!(what, %detail, "Delete lost a race to a new reference");
            Ok(Vec::new())
        }
        other => other,
    }
}

/// Totals from one `CollectorRunner::run_once`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    /// Rows deleted per collector, in run order
    pub deleted: Vec<(&'static str, usize)>,
    /// Collectors that failed, with their error message
    pub failed: Vec<(&'static str, String)>,
}

impl CollectionSummary {
    pub fn total(&self) -> usize {
        self.deleted.iter().map(|(_, n)| n).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs the collectors in dependency-safe order
pub struct CollectorRunner {
    collectors: Vec<Box<dyn Collector>>,
}

impl CollectorRunner {
    /// Standard order: uses, then sessions, then caches, then configs
    pub fn new(store: Arc<dyn Store>, audit: AuditLog) -> Self {
        Self::with_collectors(vec![
            Box::new(ConfigUseCollector::new(store.clone(), audit.clone())),
            Box::new(CacheUseCollector::new(store.clone(), audit.clone())),
            Box::new(CheckSessionCollector::new(store.clone(), audit.clone())),
            Box::new(CacheCollector::new(store.clone(), audit.clone())),
            Box::new(ConfigCollector::new(store, audit)),
        ])
    }

    pub fn with_collectors(collectors: Vec<Box<dyn Collector>>) -> Self {
        Self { collectors }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// Run every collector once; a failing collector does not stop the rest
    pub async fn run_once(&self) -> CollectionSummary {
        let mut summary = CollectionSummary::default();

        for collector in &self.collectors {
            match collector.run().await {
                Ok(deleted) => {
                    if deleted > 0 {
                        info!(collector = collector.name(), deleted, "Collected");
                    }
                    summary.deleted.push((collector.name(), deleted));
                }
                Err(e) => {
                    warn!(collector = collector.name(), "Collector failed: {}", e);
                    summary.failed.push((collector.name(), e.to_string()));
                }
            }
        }

        summary
    }

    /// Run every `interval` until `shutdown` flips to true
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.run_once().await;
                    debug!(
                        deleted = summary.total(),
                        failed = summary.failed.len(),
                        "Collection pass done"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Collector runner stopping");
                        return;
                    }
                }
            }
        }
    }
}
