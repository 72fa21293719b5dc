//! Config Store and the config side of the Use Tracker

use crate::cache::{find_or_create_config, MAX_RACE_ATTEMPTS};
use crate::error::{RadarError, RadarResult};
use crate::lock::{Lock, LockFactory, LockId};
use crate::resource::{
    resolve, ResourceConfig, ResourceTypes, ResourceUser, Source, UsedResourceConfig,
};
use crate::store::Store;
use std::sync::Arc;
use tracing::debug;

/// Finds, creates and records uses of resource configs
#[derive(Clone)]
pub struct ResourceConfigFactory {
    store: Arc<dyn Store>,
    locks: LockFactory,
}

impl ResourceConfigFactory {
    pub fn new(store: Arc<dyn Store>, locks: LockFactory) -> Self {
        Self { store, locks }
    }

    /// Resolve `type_name` + `source` against `types`, then find-or-create and use it
    pub async fn find_or_create_resource_config(
        &self,
        user: ResourceUser,
        type_name: &str,
        source: &Source,
        types: &ResourceTypes,
    ) -> RadarResult<UsedResourceConfig> {
        let config = resolve(type_name, source, types)?;
        self.use_resource_config(user, &config).await
    }

    /// Find-or-create `config` without recording a use
    pub async fn find_or_create(&self, config: &ResourceConfig) -> RadarResult<UsedResourceConfig> {
        find_or_create_config(self.store.as_ref(), config).await
    }

    /// Find-or-create `config` and record that `user` depends on it.
    ///
    /// Safe to repeat. If a collector deletes a row between the create and
    /// the use insert, the whole operation is redone.
    pub async fn use_resource_config(
        &self,
        user: ResourceUser,
        config: &ResourceConfig,
    ) -> RadarResult<UsedResourceConfig> {
        for attempt in 1..=MAX_RACE_ATTEMPTS {
            let used = find_or_create_config(self.store.as_ref(), config).await;
            let used = match used {
                Err(e) if e.is_foreign_key_violation() => {
                    debug!(attempt, "Resource config parent vanished; retrying");
                    continue;
                }
                other => other?,
            };

            match self.store.insert_config_use(used.id, user).await {
                Ok(()) => {
                    let (key, id) = user.audit_field();
                    debug!(
                        resource_config_id = used.id,
                        user_kind = key,
                        user_id = id,
                        "Using resource config"
                    );
                    return Ok(used);
                }
                Err(e) if e.is_foreign_key_violation() => {
                    debug!(
                        attempt,
                        resource_config_id = used.id,
                        "Resource config collected before use; retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(RadarError::ConcurrentModification("resource config use".to_string()))
    }

    /// Use `config` on behalf of `user`, then try once for its checking lock.
    ///
    /// `None` means another process holds the lock; that is not a failure.
    pub async fn acquire_resource_checking_lock(
        &self,
        user: ResourceUser,
        config: &ResourceConfig,
    ) -> RadarResult<(UsedResourceConfig, Option<Lock>)> {
        let used = self.use_resource_config(user, config).await?;
        let lock = self
            .locks
            .try_acquire(LockId::resource_config_checking(used.id))
            .await?;
        Ok((used, lock))
    }

    /// Try once for the checking lock of an already-used config
    pub async fn try_checking_lock(&self, used: &UsedResourceConfig) -> RadarResult<Option<Lock>> {
        self.locks
            .try_acquire(LockId::resource_config_checking(used.id))
            .await
    }
}
