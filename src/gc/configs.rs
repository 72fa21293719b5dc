//! Collectors for unreferenced resource configs and caches

use super::{optimistic_delete, Collector};
use crate::audit::AuditLog;
use crate::error::RadarResult;
use crate::store::Store;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Deletes resource configs that have neither uses nor caches
pub struct ConfigCollector {
    store: Arc<dyn Store>,
    audit: AuditLog,
}

impl ConfigCollector {
    pub fn new(store: Arc<dyn Store>, audit: AuditLog) -> Self {
        Self { store, audit }
    }
}

#[async_trait]
impl Collector for ConfigCollector {
    fn name(&self) -> &'static str {
        "resource-configs"
    }

    async fn run(&self) -> RadarResult<usize> {
        let deleted = optimistic_delete(
            "resource configs",
            self.store.delete_unreferenced_configs().await,
        )?;

        for row in &deleted {
            debug!(
                resource_config_id = row.id,
                source_hash = %row.source_hash,
                "Deleted resource config"
            );
            self.audit
                .log(
                    "gc.resource_config.deleted",
                    &json!({
                        "resource_config_id": row.id,
                        "parent": row.parent,
                        "source_hash": row.source_hash,
                    }),
                )
                .await;
        }

        Ok(deleted.len())
    }
}

/// Deletes resource caches with no uses and no configs built on them
pub struct CacheCollector {
    store: Arc<dyn Store>,
    audit: AuditLog,
}

impl CacheCollector {
    pub fn new(store: Arc<dyn Store>, audit: AuditLog) -> Self {
        Self { store, audit }
    }
}

#[async_trait]
impl Collector for CacheCollector {
    fn name(&self) -> &'static str {
        "resource-caches"
    }

    async fn run(&self) -> RadarResult<usize> {
        let deleted = optimistic_delete(
            "resource caches",
            self.store.delete_unreferenced_caches().await,
        )?;

        for row in &deleted {
            debug!(
                resource_cache_id = row.id,
                resource_config_id = row.resource_config_id,
                "Deleted resource cache"
            );
            self.audit
                .log(
                    "gc.resource_cache.deleted",
                    &json!({
                        "resource_cache_id": row.id,
                        "resource_config_id": row.resource_config_id,
                        "version": row.version,
                        "params_hash": row.params_hash,
                    }),
                )
                .await;
        }

        Ok(deleted.len())
    }
}
