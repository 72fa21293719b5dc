//! Cache Store and the cache side of the Use Tracker

use crate::cache::{find_or_create_cache, MAX_RACE_ATTEMPTS};
use crate::error::{RadarError, RadarResult};
use crate::resource::{MetadataField, ResourceCache, ResourceUser, UsedResourceCache};
use crate::store::Store;
use std::sync::Arc;
use tracing::debug;

/// Finds, creates and records uses of resource caches
#[derive(Clone)]
pub struct ResourceCacheFactory {
    store: Arc<dyn Store>,
}

impl ResourceCacheFactory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Find-or-create `cache` (and its config ancestry) and record `user` on it
    pub async fn find_or_create_resource_cache(
        &self,
        user: ResourceUser,
        cache: &ResourceCache,
    ) -> RadarResult<UsedResourceCache> {
        for attempt in 1..=MAX_RACE_ATTEMPTS {
            let used = match find_or_create_cache(self.store.as_ref(), cache).await {
                Err(e) if e.is_foreign_key_violation() => {
                    debug!(attempt, "Resource cache ancestry vanished; retrying");
                    continue;
                }
                other => other?,
            };

            match self.store.insert_cache_use(used.id, user).await {
                Ok(()) => return Ok(used),
                Err(e) if e.is_foreign_key_violation() => {
                    debug!(
                        attempt,
                        resource_cache_id = used.id,
                        "Resource cache collected before use; retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(RadarError::ConcurrentModification("resource cache use".to_string()))
    }

    /// Replace the cache's metadata
    pub async fn update_resource_cache_metadata(
        &self,
        cache: &UsedResourceCache,
        metadata: &[MetadataField],
    ) -> RadarResult<()> {
        self.store
            .update_resource_cache_metadata(cache.id, metadata)
            .await
    }

    pub async fn resource_cache_metadata(
        &self,
        cache: &UsedResourceCache,
    ) -> RadarResult<Vec<MetadataField>> {
        self.store.resource_cache_metadata(cache.id).await
    }
}
