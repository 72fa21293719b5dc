//! Content-addressed config and cache stores, plus use tracking
//!
//! Identity rows are found or created bottom-up: the base resource type (or
//! parent cache) first, then the config, then any cache under it. Creating a
//! row that already exists is not an error; the loser of the race re-selects.
//!
//! # Races
//!
//! | Race | Surfaces as | Recovery |
//! |------|-------------|----------|
//! | Two creators of one identity | `UniqueViolation` | re-select the winner's row |
//! | Collector deletes a row mid-use | `ForeignKeyViolation` | redo the whole find-or-create + use |
//! | Either, repeatedly | `ConcurrentModification` | surfaced; retried on the caller's next tick |

pub mod resource_cache;
pub mod resource_config;

pub use resource_cache::ResourceCacheFactory;
pub use resource_config::ResourceConfigFactory;

use crate::error::{RadarError, RadarResult};
use crate::resource::{
    ConfigOrigin, ResourceCache, ResourceConfig, UsedBaseResourceType, UsedConfigOrigin,
    UsedResourceCache, UsedResourceConfig, Version,
};
use crate::store::{ConfigParent, Store};
use futures_util::future::{BoxFuture, FutureExt};
use tracing::debug;

/// Attempts before a race is reported as `ConcurrentModification`
pub(crate) const MAX_RACE_ATTEMPTS: u32 = 5;

/// Unique key of one identity row
enum IdentityKey<'a> {
    BaseResourceType(&'a str),
    ResourceConfig(ConfigParent, &'a str),
    ResourceCache(i64, &'a Version, &'a str),
}

impl IdentityKey<'_> {
    fn describe(&self) -> &'static str {
        match self {
            Self::BaseResourceType(_) => "base resource type",
            Self::ResourceConfig(..) => "resource config",
            Self::ResourceCache(..) => "resource cache",
        }
    }

    async fn find(&self, store: &dyn Store) -> RadarResult<Option<i64>> {
        match self {
            Self::BaseResourceType(name) => store.find_base_resource_type(name).await,
            Self::ResourceConfig(parent, hash) => store.find_resource_config(*parent, hash).await,
            Self::ResourceCache(config, version, params) => {
                store.find_resource_cache(*config, version, params).await
            }
        }
    }

    async fn create(&self, store: &dyn Store) -> RadarResult<i64> {
        match self {
            Self::BaseResourceType(name) => store.create_base_resource_type(name).await,
            Self::ResourceConfig(parent, hash) => {
                store.create_resource_config(*parent, hash).await
            }
            Self::ResourceCache(config, version, params) => {
                store.create_resource_cache(*config, version, params).await
            }
        }
    }
}

async fn find_or_create_identity(store: &dyn Store, key: IdentityKey<'_>) -> RadarResult<i64> {
    for _ in 0..MAX_RACE_ATTEMPTS {
        if let Some(id) = key.find(store).await? {
            return Ok(id);
        }
        match key.create(store).await {
            Ok(id) => {
                debug!(id, "Created {}", key.describe());
                return Ok(id);
            }
            Err(e) if e.is_unique_violation() => {
                debug!("Lost create race for {}; re-selecting", key.describe());
            }
            Err(e) => return Err(e),
        }
    }
    Err(RadarError::ConcurrentModification(key.describe().to_string()))
}

/// Find or create a config and every identity row it is built on
pub(crate) fn find_or_create_config<'a>(
    store: &'a dyn Store,
    config: &'a ResourceConfig,
) -> BoxFuture<'a, RadarResult<UsedResourceConfig>> {
    async move {
        let (parent, origin) = match &config.origin {
            ConfigOrigin::BaseResourceType(name) => {
                let id = find_or_create_identity(store, IdentityKey::BaseResourceType(name)).await?;
                (
                    ConfigParent::BaseResourceType(id),
                    UsedConfigOrigin::BaseResourceType(UsedBaseResourceType {
                        id,
                        name: name.clone(),
                    }),
                )
            }
            ConfigOrigin::ResourceCache(cache) => {
                let used = find_or_create_cache(store, cache).await?;
                (
                    ConfigParent::ResourceCache(used.id),
                    UsedConfigOrigin::ResourceCache(Box::new(used)),
                )
            }
        };

        let source_hash = config.source_hash();
        let id =
            find_or_create_identity(store, IdentityKey::ResourceConfig(parent, &source_hash))
                .await?;

        Ok(UsedResourceConfig {
            id,
            origin,
            source_hash,
        })
    }
    .boxed()
}

/// Find or create a cache, its config, and everything beneath that
pub(crate) fn find_or_create_cache<'a>(
    store: &'a dyn Store,
    cache: &'a ResourceCache,
) -> BoxFuture<'a, RadarResult<UsedResourceCache>> {
    async move {
        let config = find_or_create_config(store, &cache.resource_config).await?;
        let params_hash = cache.params_hash();
        let id = find_or_create_identity(
            store,
            IdentityKey::ResourceCache(config.id, &cache.version, &params_hash),
        )
        .await?;

        Ok(UsedResourceCache {
            id,
            resource_config: config,
            version: cache.version.clone(),
            params_hash,
        })
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Source;
    use crate::store::MemoryStore;

    fn custom_config() -> ResourceConfig {
        let image = ResourceConfig::base("registry-image", Source::new().with("repository", "git"));
        let parent = ResourceCache::new(image, Version::from_pairs([("digest", "sha256:1")]));
        ResourceConfig::custom(parent, Source::new().with("uri", "u"))
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent() {
        let store = MemoryStore::new();
        let config = custom_config();

        let first = find_or_create_config(&store, &config).await.unwrap();
        let second = find_or_create_config(&store, &config).await.unwrap();

        assert_eq!(first, second);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.base_resource_types, 1);
        assert_eq!(stats.resource_configs, 2);
        assert_eq!(stats.resource_caches, 1);
    }

    #[tokio::test]
    async fn custom_config_points_at_parent_cache() {
        let store = MemoryStore::new();
        let used = find_or_create_config(&store, &custom_config()).await.unwrap();

        let UsedConfigOrigin::ResourceCache(parent) = &used.origin else {
            panic!("expected cache origin");
        };
        let row = store.resource_config(used.id).await.unwrap().unwrap();
        assert_eq!(row.parent, ConfigParent::ResourceCache(parent.id));
        assert!(matches!(
            parent.resource_config.origin,
            UsedConfigOrigin::BaseResourceType(ref b) if b.name == "registry-image"
        ));
    }

    #[tokio::test]
    async fn different_params_are_different_caches() {
        let store = MemoryStore::new();
        let config = ResourceConfig::base("git", Source::new());
        let version = Version::from_pairs([("ref", "a")]);

        let plain_cache = ResourceCache::new(config.clone(), version.clone());
        let plain = find_or_create_cache(&store, &plain_cache).await.unwrap();
        let shallow = find_or_create_cache(
            &store,
            &ResourceCache::new(config, version).with_params(Source::new().with("depth", 1)),
        )
        .await
        .unwrap();

        assert_ne!(plain.id, shallow.id);
        assert_eq!(plain.resource_config.id, shallow.resource_config.id);
    }
}
