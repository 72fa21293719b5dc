//! In-process store
//!
//! Holds every table behind one mutex and enforces the same uniqueness and
//! referential rules as the SQLite schema, so code exercised against it
//! behaves the same against a shared database.

use crate::error::{RadarError, RadarResult};
use crate::lock::LockId;
use crate::resource::{MetadataField, ResourceUser, Version};
use crate::store::{
    CheckSessionRow, Checkable, CheckableDef, CheckableKind, ConfigParent, DeletedUse,
    PipelineRow, ResourceCacheRow, ResourceConfigRow, Store, StoreStats, UsePredicate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

struct CacheEntry {
    row: ResourceCacheRow,
    metadata: Vec<MetadataField>,
}

struct BuildEntry {
    finished: bool,
    interceptible: bool,
}

struct LockEntry {
    owner: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    base_resource_types: BTreeMap<i64, String>,
    configs: BTreeMap<i64, ResourceConfigRow>,
    caches: BTreeMap<i64, CacheEntry>,
    config_uses: Vec<(i64, ResourceUser)>,
    cache_uses: Vec<(i64, ResourceUser)>,
    check_times: HashMap<i64, DateTime<Utc>>,
    sessions: BTreeMap<i64, CheckSessionRow>,
    locks: HashMap<LockId, LockEntry>,
    pipelines: BTreeMap<i64, PipelineRow>,
    builds: BTreeMap<i64, BuildEntry>,
    resources: BTreeMap<i64, Checkable>,
    resource_types: BTreeMap<i64, Checkable>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn checkables(&self, kind: CheckableKind) -> &BTreeMap<i64, Checkable> {
        match kind {
            CheckableKind::Resource => &self.resources,
            CheckableKind::ResourceType => &self.resource_types,
        }
    }

    fn checkables_mut(&mut self, kind: CheckableKind) -> &mut BTreeMap<i64, Checkable> {
        match kind {
            CheckableKind::Resource => &mut self.resources,
            CheckableKind::ResourceType => &mut self.resource_types,
        }
    }

    fn checkable_for(&self, user: ResourceUser) -> Option<&Checkable> {
        match user {
            ResourceUser::Build(_) => None,
            ResourceUser::Resource(id) => self.resources.get(&id),
            ResourceUser::ResourceType(id) => self.resource_types.get(&id),
        }
    }

    fn user_exists(&self, user: ResourceUser) -> bool {
        match user {
            ResourceUser::Build(id) => self.builds.contains_key(&id),
            _ => self.checkable_for(user).is_some(),
        }
    }

    fn parent_exists(&self, parent: ConfigParent) -> bool {
        match parent {
            ConfigParent::BaseResourceType(id) => self.base_resource_types.contains_key(&id),
            ConfigParent::ResourceCache(id) => self.caches.contains_key(&id),
        }
    }

    /// Whether a use of a config with `config_hash` by `user` matches the predicate
    fn use_matches(
        &self,
        predicate: UsePredicate,
        user: ResourceUser,
        config_hash: Option<&str>,
    ) -> bool {
        match (predicate, user) {
            (UsePredicate::FinishedBuilds, ResourceUser::Build(id)) => self
                .builds
                .get(&id)
                .is_some_and(|b| b.finished && !b.interceptible),
            (UsePredicate::InactiveResourceTypes, ResourceUser::ResourceType(_))
            | (UsePredicate::InactiveResources, ResourceUser::Resource(_)) => {
                self.checkable_for(user).is_some_and(|c| !c.active)
            }
            (UsePredicate::RemovedPipelines, ResourceUser::Resource(_))
            | (UsePredicate::RemovedPipelines, ResourceUser::ResourceType(_)) => self
                .checkable_for(user)
                .is_some_and(|c| c.pipeline_id.is_none()),
            (UsePredicate::OutdatedResourceConfigs, ResourceUser::Resource(_))
            | (UsePredicate::OutdatedResourceConfigs, ResourceUser::ResourceType(_)) => {
                match (self.checkable_for(user), config_hash) {
                    (Some(c), Some(hash)) => c.source_hash != hash,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

/// Store kept entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_base_resource_type(&self, name: &str) -> RadarResult<Option<i64>> {
        let tables = self.tables.lock();
        Ok(tables
            .base_resource_types
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id))
    }

    async fn create_base_resource_type(&self, name: &str) -> RadarResult<i64> {
        let mut tables = self.tables.lock();
        if tables.base_resource_types.values().any(|n| n == name) {
            return Err(RadarError::UniqueViolation(format!(
                "base_resource_types.name = {}",
                name
            )));
        }
        let id = tables.next_id();
        tables.base_resource_types.insert(id, name.to_string());
        Ok(id)
    }

    async fn find_resource_config(
        &self,
        parent: ConfigParent,
        source_hash: &str,
    ) -> RadarResult<Option<i64>> {
        let tables = self.tables.lock();
        Ok(tables
            .configs
            .values()
            .find(|c| c.parent == parent && c.source_hash == source_hash)
            .map(|c| c.id))
    }

    async fn create_resource_config(
        &self,
        parent: ConfigParent,
        source_hash: &str,
    ) -> RadarResult<i64> {
        let mut tables = self.tables.lock();
        if !tables.parent_exists(parent) {
            return Err(RadarError::ForeignKeyViolation(format!(
                "resource_configs parent {:?} does not exist",
                parent
            )));
        }
        if tables
            .configs
            .values()
            .any(|c| c.parent == parent && c.source_hash == source_hash)
        {
            return Err(RadarError::UniqueViolation(format!(
                "resource_configs ({:?}, {})",
                parent, source_hash
            )));
        }
        let id = tables.next_id();
        tables.configs.insert(
            id,
            ResourceConfigRow {
                id,
                parent,
                source_hash: source_hash.to_string(),
            },
        );
        Ok(id)
    }

    async fn resource_config(&self, id: i64) -> RadarResult<Option<ResourceConfigRow>> {
        Ok(self.tables.lock().configs.get(&id).cloned())
    }

    async fn find_resource_cache(
        &self,
        resource_config_id: i64,
        version: &Version,
        params_hash: &str,
    ) -> RadarResult<Option<i64>> {
        let tables = self.tables.lock();
        Ok(tables
            .caches
            .values()
            .find(|c| {
                c.row.resource_config_id == resource_config_id
                    && &c.row.version == version
                    && c.row.params_hash == params_hash
            })
            .map(|c| c.row.id))
    }

    async fn create_resource_cache(
        &self,
        resource_config_id: i64,
        version: &Version,
        params_hash: &str,
    ) -> RadarResult<i64> {
        let mut tables = self.tables.lock();
        if !tables.configs.contains_key(&resource_config_id) {
            return Err(RadarError::ForeignKeyViolation(format!(
                "resource config {} does not exist",
                resource_config_id
            )));
        }
        if tables.caches.values().any(|c| {
            c.row.resource_config_id == resource_config_id
                && &c.row.version == version
                && c.row.params_hash == params_hash
        }) {
            return Err(RadarError::UniqueViolation(format!(
                "resource_caches ({}, {}, {})",
                resource_config_id, version, params_hash
            )));
        }
        let id = tables.next_id();
        tables.caches.insert(
            id,
            CacheEntry {
                row: ResourceCacheRow {
                    id,
                    resource_config_id,
                    version: version.clone(),
                    params_hash: params_hash.to_string(),
                },
                metadata: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn resource_cache(&self, id: i64) -> RadarResult<Option<ResourceCacheRow>> {
        Ok(self.tables.lock().caches.get(&id).map(|c| c.row.clone()))
    }

    async fn update_resource_cache_metadata(
        &self,
        id: i64,
        metadata: &[MetadataField],
    ) -> RadarResult<()> {
        let mut tables = self.tables.lock();
        let entry = tables
            .caches
            .get_mut(&id)
            .ok_or_else(|| RadarError::ResourceCacheNotFound(id))?;
        entry.metadata = metadata.to_vec();
        Ok(())
    }

    async fn resource_cache_metadata(&self, id: i64) -> RadarResult<Vec<MetadataField>> {
        let tables = self.tables.lock();
        tables
            .caches
            .get(&id)
            .map(|c| c.metadata.clone())
            .ok_or_else(|| RadarError::ResourceCacheNotFound(id))
    }

    async fn insert_config_use(
        &self,
        resource_config_id: i64,
        user: ResourceUser,
    ) -> RadarResult<()> {
        let mut tables = self.tables.lock();
        if !tables.configs.contains_key(&resource_config_id) {
            return Err(RadarError::ForeignKeyViolation(format!(
                "resource config {} does not exist",
                resource_config_id
            )));
        }
        if !tables.user_exists(user) {
            return Err(RadarError::ForeignKeyViolation(format!("{} does not exist", user)));
        }
        if !tables
            .config_uses
            .iter()
            .any(|(id, u)| *id == resource_config_id && *u == user)
        {
            tables.config_uses.push((resource_config_id, user));
        }
        Ok(())
    }

    async fn config_uses(&self, resource_config_id: i64) -> RadarResult<Vec<ResourceUser>> {
        let tables = self.tables.lock();
        Ok(tables
            .config_uses
            .iter()
            .filter(|(id, _)| *id == resource_config_id)
            .map(|(_, u)| *u)
            .collect())
    }

    async fn insert_cache_use(
        &self,
        resource_cache_id: i64,
        user: ResourceUser,
    ) -> RadarResult<()> {
        let mut tables = self.tables.lock();
        if !tables.caches.contains_key(&resource_cache_id) {
            return Err(RadarError::ForeignKeyViolation(format!(
                "resource cache {} does not exist",
                resource_cache_id
            )));
        }
        if !tables.user_exists(user) {
            return Err(RadarError::ForeignKeyViolation(format!("{} does not exist", user)));
        }
        if !tables
            .cache_uses
            .iter()
            .any(|(id, u)| *id == resource_cache_id && *u == user)
        {
            tables.cache_uses.push((resource_cache_id, user));
        }
        Ok(())
    }

    async fn cache_uses(&self, resource_cache_id: i64) -> RadarResult<Vec<ResourceUser>> {
        let tables = self.tables.lock();
        Ok(tables
            .cache_uses
            .iter()
            .filter(|(id, _)| *id == resource_cache_id)
            .map(|(_, u)| *u)
            .collect())
    }

    async fn delete_config_uses(&self, predicate: UsePredicate) -> RadarResult<Vec<DeletedUse>> {
        let mut tables = self.tables.lock();
        let uses = std::mem::take(&mut tables.config_uses);
        let mut deleted = Vec::new();
        let mut kept = Vec::with_capacity(uses.len());
        for (target_id, user) in uses {
            let hash = tables.configs.get(&target_id).map(|c| c.source_hash.as_str());
            if tables.use_matches(predicate, user, hash) {
                deleted.push(DeletedUse { target_id, user });
            } else {
                kept.push((target_id, user));
            }
        }
        tables.config_uses = kept;
        Ok(deleted)
    }

    async fn delete_cache_uses(&self, predicate: UsePredicate) -> RadarResult<Vec<DeletedUse>> {
        if predicate == UsePredicate::OutdatedResourceConfigs {
            return Ok(Vec::new());
        }
        let mut tables = self.tables.lock();
        let uses = std::mem::take(&mut tables.cache_uses);
        let mut deleted = Vec::new();
        let mut kept = Vec::with_capacity(uses.len());
        for (target_id, user) in uses {
            if tables.use_matches(predicate, user, None) {
                deleted.push(DeletedUse { target_id, user });
            } else {
                kept.push((target_id, user));
            }
        }
        tables.cache_uses = kept;
        Ok(deleted)
    }

    async fn delete_unreferenced_configs(&self) -> RadarResult<Vec<ResourceConfigRow>> {
        let mut guard = self.tables.lock();
        let tables = &mut *guard;
        let doomed: Vec<i64> = tables
            .configs
            .keys()
            .copied()
            .filter(|id| {
                !tables.config_uses.iter().any(|(c, _)| c == id)
                    && !tables.caches.values().any(|c| c.row.resource_config_id == *id)
            })
            .collect();

        let mut deleted = Vec::with_capacity(doomed.len());
        for id in doomed {
            if let Some(row) = tables.configs.remove(&id) {
                deleted.push(row);
            }
            tables.check_times.remove(&id);
            tables.sessions.retain(|_, s| s.resource_config_id != id);
            for checkable in tables
                .resources
                .values_mut()
                .chain(tables.resource_types.values_mut())
            {
                if checkable.resource_config_id == Some(id) {
                    checkable.resource_config_id = None;
                }
            }
        }
        Ok(deleted)
    }

    async fn delete_unreferenced_caches(&self) -> RadarResult<Vec<ResourceCacheRow>> {
        let mut tables = self.tables.lock();
        let doomed: Vec<i64> = tables
            .caches
            .keys()
            .copied()
            .filter(|id| {
                !tables.cache_uses.iter().any(|(c, _)| c == id)
                    && !tables
                        .configs
                        .values()
                        .any(|c| c.parent == ConfigParent::ResourceCache(*id))
            })
            .collect();

        Ok(doomed
            .into_iter()
            .filter_map(|id| tables.caches.remove(&id).map(|c| c.row))
            .collect())
    }

    async fn try_acquire_lock(
        &self,
        id: LockId,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> RadarResult<bool> {
        let now = Utc::now();
        let mut tables = self.tables.lock();
        if let Some(held) = tables.locks.get(&id) {
            if held.expires_at > now {
                return Ok(false);
            }
        }
        tables.locks.insert(
            id,
            LockEntry {
                owner: owner.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn release_lock(&self, id: LockId, owner: &str) -> RadarResult<()> {
        let mut tables = self.tables.lock();
        if tables.locks.get(&id).is_some_and(|l| l.owner == owner) {
            tables.locks.remove(&id);
        }
        Ok(())
    }

    async fn last_checked(&self, resource_config_id: i64) -> RadarResult<Option<DateTime<Utc>>> {
        Ok(self.tables.lock().check_times.get(&resource_config_id).copied())
    }

    async fn set_last_checked(
        &self,
        resource_config_id: i64,
        at: DateTime<Utc>,
    ) -> RadarResult<()> {
        let mut tables = self.tables.lock();
        if !tables.configs.contains_key(&resource_config_id) {
            return Err(RadarError::ForeignKeyViolation(format!(
                "resource config {} does not exist",
                resource_config_id
            )));
        }
        tables.check_times.insert(resource_config_id, at);
        Ok(())
    }

    async fn find_check_session(
        &self,
        resource_config_id: i64,
        expires_after: DateTime<Utc>,
    ) -> RadarResult<Option<CheckSessionRow>> {
        let tables = self.tables.lock();
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.resource_config_id == resource_config_id && s.expires_at > expires_after)
            .max_by_key(|s| s.expires_at)
            .cloned())
    }

    async fn create_check_session(
        &self,
        resource_config_id: i64,
        expires_at: DateTime<Utc>,
    ) -> RadarResult<CheckSessionRow> {
        let mut tables = self.tables.lock();
        if !tables.configs.contains_key(&resource_config_id) {
            return Err(RadarError::ForeignKeyViolation(format!(
                "resource config {} does not exist",
                resource_config_id
            )));
        }
        let id = tables.next_id();
        let row = CheckSessionRow {
            id,
            resource_config_id,
            expires_at,
        };
        tables.sessions.insert(id, row.clone());
        Ok(row)
    }

    async fn delete_expired_check_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> RadarResult<Vec<CheckSessionRow>> {
        let mut tables = self.tables.lock();
        let expired: Vec<i64> = tables
            .sessions
            .values()
            .filter(|s| s.expires_at <= now)
            .map(|s| s.id)
            .collect();
        Ok(expired
            .into_iter()
            .filter_map(|id| tables.sessions.remove(&id))
            .collect())
    }

    async fn create_pipeline(&self, team_id: i64, name: &str) -> RadarResult<i64> {
        let mut tables = self.tables.lock();
        if tables
            .pipelines
            .values()
            .any(|p| p.team_id == team_id && p.name == name)
        {
            return Err(RadarError::UniqueViolation(format!(
                "pipelines ({}, {})",
                team_id, name
            )));
        }
        let id = tables.next_id();
        tables.pipelines.insert(
            id,
            PipelineRow {
                id,
                team_id,
                name: name.to_string(),
                paused: false,
            },
        );
        Ok(id)
    }

    async fn pipeline(&self, id: i64) -> RadarResult<Option<PipelineRow>> {
        Ok(self.tables.lock().pipelines.get(&id).cloned())
    }

    async fn set_pipeline_paused(&self, id: i64, paused: bool) -> RadarResult<()> {
        let mut tables = self.tables.lock();
        let pipeline = tables
            .pipelines
            .get_mut(&id)
            .ok_or(RadarError::PipelineNotFound(id))?;
        pipeline.paused = paused;
        Ok(())
    }

    async fn delete_pipeline(&self, id: i64) -> RadarResult<()> {
        let mut guard = self.tables.lock();
        let tables = &mut *guard;
        if tables.pipelines.remove(&id).is_none() {
            return Err(RadarError::PipelineNotFound(id));
        }
        for checkable in tables
            .resources
            .values_mut()
            .chain(tables.resource_types.values_mut())
        {
            if checkable.pipeline_id == Some(id) {
                checkable.pipeline_id = None;
            }
        }
        Ok(())
    }

    async fn create_build(&self, interceptible: bool) -> RadarResult<i64> {
        let mut tables = self.tables.lock();
        let id = tables.next_id();
        tables.builds.insert(
            id,
            BuildEntry {
                finished: false,
                interceptible,
            },
        );
        Ok(id)
    }

    async fn finish_build(&self, id: i64) -> RadarResult<()> {
        if let Some(build) = self.tables.lock().builds.get_mut(&id) {
            build.finished = true;
        }
        Ok(())
    }

    async fn set_build_interceptible(&self, id: i64, interceptible: bool) -> RadarResult<()> {
        if let Some(build) = self.tables.lock().builds.get_mut(&id) {
            build.interceptible = interceptible;
        }
        Ok(())
    }

    async fn save_checkable(
        &self,
        kind: CheckableKind,
        pipeline_id: i64,
        def: &CheckableDef,
    ) -> RadarResult<i64> {
        let mut tables = self.tables.lock();
        if !tables.pipelines.contains_key(&pipeline_id) {
            return Err(RadarError::ForeignKeyViolation(format!(
                "pipeline {} does not exist",
                pipeline_id
            )));
        }

        let existing = tables
            .checkables(kind)
            .values()
            .find(|c| c.pipeline_id == Some(pipeline_id) && c.name == def.name)
            .map(|c| c.id);

        let id = match existing {
            Some(id) => id,
            None => tables.next_id(),
        };

        let entry = tables
            .checkables_mut(kind)
            .entry(id)
            .or_insert_with(|| Checkable {
                kind,
                id,
                pipeline_id: Some(pipeline_id),
                name: def.name.clone(),
                type_name: String::new(),
                source: Default::default(),
                source_hash: String::new(),
                version: None,
                check_every: None,
                active: true,
                resource_config_id: None,
                check_error: None,
            });
        entry.type_name = def.type_name.clone();
        entry.source = def.source.clone();
        entry.source_hash = def.source.hash();
        entry.check_every = def.check_every;
        entry.active = true;
        Ok(id)
    }

    async fn checkable(
        &self,
        kind: CheckableKind,
        pipeline_id: i64,
        name: &str,
    ) -> RadarResult<Option<Checkable>> {
        let tables = self.tables.lock();
        Ok(tables
            .checkables(kind)
            .values()
            .find(|c| c.pipeline_id == Some(pipeline_id) && c.name == name)
            .cloned())
    }

    async fn checkables(
        &self,
        kind: CheckableKind,
        pipeline_id: i64,
    ) -> RadarResult<Vec<Checkable>> {
        let tables = self.tables.lock();
        Ok(tables
            .checkables(kind)
            .values()
            .filter(|c| c.pipeline_id == Some(pipeline_id))
            .cloned()
            .collect())
    }

    async fn set_checkable_active(
        &self,
        kind: CheckableKind,
        id: i64,
        active: bool,
    ) -> RadarResult<()> {
        if let Some(c) = self.tables.lock().checkables_mut(kind).get_mut(&id) {
            c.active = active;
        }
        Ok(())
    }

    async fn save_checkable_version(
        &self,
        kind: CheckableKind,
        id: i64,
        version: &Version,
    ) -> RadarResult<()> {
        if let Some(c) = self.tables.lock().checkables_mut(kind).get_mut(&id) {
            c.version = Some(version.clone());
        }
        Ok(())
    }

    async fn set_checkable_config(
        &self,
        kind: CheckableKind,
        id: i64,
        resource_config_id: i64,
    ) -> RadarResult<()> {
        let mut tables = self.tables.lock();
        if !tables.configs.contains_key(&resource_config_id) {
            return Err(RadarError::ForeignKeyViolation(format!(
                "resource config {} does not exist",
                resource_config_id
            )));
        }
        if let Some(c) = tables.checkables_mut(kind).get_mut(&id) {
            c.resource_config_id = Some(resource_config_id);
        }
        Ok(())
    }

    async fn set_check_error(
        &self,
        kind: CheckableKind,
        id: i64,
        error: Option<&str>,
    ) -> RadarResult<()> {
        if let Some(c) = self.tables.lock().checkables_mut(kind).get_mut(&id) {
            c.check_error = error.map(str::to_string);
        }
        Ok(())
    }

    async fn stats(&self) -> RadarResult<StoreStats> {
        let tables = self.tables.lock();
        Ok(StoreStats {
            base_resource_types: tables.base_resource_types.len() as u64,
            resource_configs: tables.configs.len() as u64,
            resource_caches: tables.caches.len() as u64,
            resource_config_uses: tables.config_uses.len() as u64,
            resource_cache_uses: tables.cache_uses.len() as u64,
            check_sessions: tables.sessions.len() as u64,
            locks: tables.locks.len() as u64,
        })
    }
}
