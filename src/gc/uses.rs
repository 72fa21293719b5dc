//! Use collectors
//!
//! Each predicate is its own delete, so one failing predicate leaves the
//! others' deletions in place. The first error is returned after every
//! predicate has had its turn.

use super::Collector;
use crate::audit::AuditLog;
use crate::error::RadarResult;
use crate::store::{DeletedUse, Store, UsePredicate};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
enum UseTable {
    Config,
    Cache,
}

impl UseTable {
    fn predicates(self) -> &'static [UsePredicate] {
        match self {
            Self::Config => &UsePredicate::CONFIG_USES,
            Self::Cache => &UsePredicate::CACHE_USES,
        }
    }

    fn target_field(self) -> &'static str {
        match self {
            Self::Config => "resource_config_id",
            Self::Cache => "resource_cache_id",
        }
    }

    fn event(self) -> &'static str {
        match self {
            Self::Config => "gc.resource_config_use.deleted",
            Self::Cache => "gc.resource_cache_use.deleted",
        }
    }

    async fn delete(
        self,
        store: &dyn Store,
        predicate: UsePredicate,
    ) -> RadarResult<Vec<DeletedUse>> {
        match self {
            Self::Config => store.delete_config_uses(predicate).await,
            Self::Cache => store.delete_cache_uses(predicate).await,
        }
    }
}

async fn collect_uses(store: &dyn Store, audit: &AuditLog, table: UseTable) -> RadarResult<usize> {
    let mut deleted = 0;
    let mut first_error = None;

    for &predicate in table.predicates() {
        let rows = match table.delete(store, predicate).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(
                    predicate = %predicate,
                    "Failed to delete {} uses: {}",
                    table.target_field(),
                    e
                );
                first_error.get_or_insert(e);
                continue;
            }
        };

        for row in &rows {
            let (user_field, user_id) = row.user.audit_field();
            debug!(
                predicate = %predicate,
                target_id = row.target_id,
                user_field,
                user_id,
                "Deleted use"
            );
            let mut data = json!({ "predicate": predicate.as_str() });
            data[table.target_field()] = json!(row.target_id);
            data[user_field] = json!(user_id);
            audit.log(table.event(), &data).await;
        }
        deleted += rows.len();
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(deleted),
    }
}

/// Removes resource config uses whose user no longer needs them
pub struct ConfigUseCollector {
    store: Arc<dyn Store>,
    audit: AuditLog,
}

impl ConfigUseCollector {
    pub fn new(store: Arc<dyn Store>, audit: AuditLog) -> Self {
        Self { store, audit }
    }
}

#[async_trait]
impl Collector for ConfigUseCollector {
    fn name(&self) -> &'static str {
        "resource-config-uses"
    }

    async fn run(&self) -> RadarResult<usize> {
        collect_uses(self.store.as_ref(), &self.audit, UseTable::Config).await
    }
}

/// Removes resource cache uses whose user no longer needs them
pub struct CacheUseCollector {
    store: Arc<dyn Store>,
    audit: AuditLog,
}

impl CacheUseCollector {
    pub fn new(store: Arc<dyn Store>, audit: AuditLog) -> Self {
        Self { store, audit }
    }
}

#[async_trait]
impl Collector for CacheUseCollector {
    fn name(&self) -> &'static str {
        "resource-cache-uses"
    }

    async fn run(&self) -> RadarResult<usize> {
        collect_uses(self.store.as_ref(), &self.audit, UseTable::Cache).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ResourceCacheFactory, ResourceConfigFactory};
    use crate::lock::LockFactory;
    use crate::resource::{ResourceCache, ResourceConfig, ResourceUser, Source, Version};
    use crate::store::{CheckableDef, CheckableKind, MemoryStore};
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(uri: &str) -> ResourceConfig {
        ResourceConfig::base("git", Source::new().with("uri", uri))
    }

    fn factory(store: &Arc<dyn Store>) -> ResourceConfigFactory {
        ResourceConfigFactory::new(
            store.clone(),
            LockFactory::new(store.clone(), Duration::from_secs(60)),
        )
    }

    #[tokio::test]
    async fn finished_build_uses_are_removed_and_audited() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let audit = AuditLog::at(dir.path().join("audit.log"));

        let running = store.create_build(false).await.unwrap();
        let finished = store.create_build(false).await.unwrap();
        let used = factory(&store)
            .use_resource_config(ResourceUser::Build(running), &config("a"))
            .await
            .unwrap();
        factory(&store)
            .use_resource_config(ResourceUser::Build(finished), &config("a"))
            .await
            .unwrap();
        store.finish_build(finished).await.unwrap();

        let deleted = ConfigUseCollector::new(store.clone(), audit.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(
            store.config_uses(used.id).await.unwrap(),
            vec![ResourceUser::Build(running)]
        );

        let log = tokio::fs::read_to_string(dir.path().join("audit.log")).await.unwrap();
        let entry: serde_json::Value = serde_json::from_str(log.trim()).unwrap();
        assert_eq!(entry["event"], "gc.resource_config_use.deleted");
        assert_eq!(entry["data"]["build_id"], finished);
        assert_eq!(entry["data"]["resource_config_id"], used.id);
        assert_eq!(entry["data"]["predicate"], "for-finished-builds");
    }

    #[tokio::test]
    async fn outdated_resource_use_is_removed() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let pipeline = store.create_pipeline(1, "main").await.unwrap();
        let def = |uri: &str| CheckableDef::new("repo", "git", Source::new().with("uri", uri));
        let id = store
            .save_checkable(CheckableKind::Resource, pipeline, &def("old"))
            .await
            .unwrap();
        let user = ResourceUser::Resource(id);
        let old = factory(&store).use_resource_config(user, &config("old")).await.unwrap();

        store
            .save_checkable(CheckableKind::Resource, pipeline, &def("new"))
            .await
            .unwrap();
        let new = factory(&store).use_resource_config(user, &config("new")).await.unwrap();

        ConfigUseCollector::new(store.clone(), AuditLog::disabled())
            .run()
            .await
            .unwrap();

        assert!(store.config_uses(old.id).await.unwrap().is_empty());
        assert_eq!(store.config_uses(new.id).await.unwrap(), vec![user]);
    }

    #[tokio::test]
    async fn inactive_resource_cache_use_is_removed() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let pipeline = store.create_pipeline(1, "main").await.unwrap();
        let id = store
            .save_checkable(
                CheckableKind::ResourceType,
                pipeline,
                &CheckableDef::new("slack", "registry-image", Source::new()),
            )
            .await
            .unwrap();
        let cache = ResourceCache::new(config("img"), Version::from_pairs([("digest", "1")]));
        let used = ResourceCacheFactory::new(store.clone())
            .find_or_create_resource_cache(ResourceUser::ResourceType(id), &cache)
            .await
            .unwrap();
        store
            .set_checkable_active(CheckableKind::ResourceType, id, false)
            .await
            .unwrap();

        let deleted = CacheUseCollector::new(store.clone(), AuditLog::disabled())
            .run()
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.cache_uses(used.id).await.unwrap().is_empty());
    }
}
