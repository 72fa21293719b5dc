//! Relational store seam
//!
//! All coordination between scanner and collector processes goes through a
//! `Store`. Creates report `UniqueViolation` when an identical row already
//! exists and `ForeignKeyViolation` when a referenced row is gone; callers
//! recover from both by re-selecting or retrying. Each method is a single
//! atomic step, so no caller holds a transaction open across calls.
//!
//! Backends:
//! - `MemoryStore`: one process, used by tests and embedders
//! - `SqliteStore`: durable, shared by processes on one host

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::RadarResult;
use crate::lock::LockId;
use crate::resource::{
    MetadataField, ResourceTypeDef, ResourceUser, Source, Version,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// What a stored resource config is created by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ConfigParent {
    BaseResourceType(i64),
    ResourceCache(i64),
}

/// A `resource_configs` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceConfigRow {
    pub id: i64,
    pub parent: ConfigParent,
    pub source_hash: String,
}

/// A `resource_caches` row (metadata is read separately)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceCacheRow {
    pub id: i64,
    pub resource_config_id: i64,
    pub version: Version,
    pub params_hash: String,
}

/// A use row removed by a collector predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeletedUse {
    /// The config or cache the use pointed at
    pub target_id: i64,
    pub user: ResourceUser,
}

/// A `resource_config_check_sessions` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckSessionRow {
    pub id: i64,
    pub resource_config_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// A `pipelines` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRow {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    pub paused: bool,
}

/// Entities the scanner checks for new versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckableKind {
    Resource,
    ResourceType,
}

impl CheckableKind {
    /// Use referrer for the entity with `id`
    pub fn user(&self, id: i64) -> ResourceUser {
        match self {
            Self::Resource => ResourceUser::Resource(id),
            Self::ResourceType => ResourceUser::ResourceType(id),
        }
    }
}

impl fmt::Display for CheckableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource => write!(f, "resource"),
            Self::ResourceType => write!(f, "resource type"),
        }
    }
}

/// Pipeline definition of a resource or resource type
#[derive(Debug, Clone, PartialEq)]
pub struct CheckableDef {
    pub name: String,
    pub type_name: String,
    pub source: Source,
    pub check_every: Option<Duration>,
}

impl CheckableDef {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            source,
            check_every: None,
        }
    }

    pub fn check_every(mut self, interval: Duration) -> Self {
        self.check_every = Some(interval);
        self
    }
}

/// A stored resource or resource type
#[derive(Debug, Clone, PartialEq)]
pub struct Checkable {
    pub kind: CheckableKind,
    pub id: i64,
    /// `None` once the owning pipeline has been removed
    pub pipeline_id: Option<i64>,
    pub name: String,
    pub type_name: String,
    pub source: Source,
    pub source_hash: String,
    pub version: Option<Version>,
    pub check_every: Option<Duration>,
    pub active: bool,
    pub resource_config_id: Option<i64>,
    /// Set while the last check failed
    pub check_error: Option<String>,
}

impl Checkable {
    pub fn user(&self) -> ResourceUser {
        self.kind.user(self.id)
    }

    /// View a stored resource type as an identity-resolution input
    pub fn to_type_def(&self) -> ResourceTypeDef {
        ResourceTypeDef {
            name: self.name.clone(),
            type_name: self.type_name.clone(),
            source: self.source.clone(),
            version: self.version.clone(),
        }
    }
}

/// Cleanup predicates for use rows; each runs as its own delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsePredicate {
    /// Referrer is a finished build nobody can attach to any more
    FinishedBuilds,
    /// Referrer is a resource type no longer in its pipeline's config
    InactiveResourceTypes,
    /// Referrer is a resource no longer in its pipeline's config
    InactiveResources,
    /// Referrer belongs to a pipeline that was removed (paused ones are kept)
    RemovedPipelines,
    /// Referrer's source no longer hashes to the config it uses
    OutdatedResourceConfigs,
}

impl UsePredicate {
    /// Predicates applied to `resource_config_uses`
    pub const CONFIG_USES: [Self; 5] = [
        Self::FinishedBuilds,
        Self::InactiveResourceTypes,
        Self::InactiveResources,
        Self::RemovedPipelines,
        Self::OutdatedResourceConfigs,
    ];

    /// Predicates applied to `resource_cache_uses`
    pub const CACHE_USES: [Self; 4] = [
        Self::FinishedBuilds,
        Self::InactiveResourceTypes,
        Self::InactiveResources,
        Self::RemovedPipelines,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FinishedBuilds => "for-finished-builds",
            Self::InactiveResourceTypes => "for-inactive-resource-types",
            Self::InactiveResources => "for-inactive-resources",
            Self::RemovedPipelines => "for-removed-pipelines",
            Self::OutdatedResourceConfigs => "for-outdated-resource-configs",
        }
    }
}

impl fmt::Display for UsePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row counts for status output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub base_resource_types: u64,
    pub resource_configs: u64,
    pub resource_caches: u64,
    pub resource_config_uses: u64,
    pub resource_cache_uses: u64,
    pub check_sessions: u64,
    pub locks: u64,
}

/// Shared relational store
#[async_trait]
pub trait Store: Send + Sync {
    // Identity rows

    async fn find_base_resource_type(&self, name: &str) -> RadarResult<Option<i64>>;

    async fn create_base_resource_type(&self, name: &str) -> RadarResult<i64>;

    async fn find_resource_config(
        &self,
        parent: ConfigParent,
        source_hash: &str,
    ) -> RadarResult<Option<i64>>;

    async fn create_resource_config(
        &self,
        parent: ConfigParent,
        source_hash: &str,
    ) -> RadarResult<i64>;

    async fn resource_config(&self, id: i64) -> RadarResult<Option<ResourceConfigRow>>;

    async fn find_resource_cache(
        &self,
        resource_config_id: i64,
        version: &Version,
        params_hash: &str,
    ) -> RadarResult<Option<i64>>;

    async fn create_resource_cache(
        &self,
        resource_config_id: i64,
        version: &Version,
        params_hash: &str,
    ) -> RadarResult<i64>;

    async fn resource_cache(&self, id: i64) -> RadarResult<Option<ResourceCacheRow>>;

    /// Replace (not merge) a cache's metadata
    async fn update_resource_cache_metadata(
        &self,
        id: i64,
        metadata: &[MetadataField],
    ) -> RadarResult<()>;

    async fn resource_cache_metadata(&self, id: i64) -> RadarResult<Vec<MetadataField>>;

    // Use rows

    /// Idempotent per (config, user)
    async fn insert_config_use(&self, resource_config_id: i64, user: ResourceUser)
        -> RadarResult<()>;

    async fn config_uses(&self, resource_config_id: i64) -> RadarResult<Vec<ResourceUser>>;

    /// Idempotent per (cache, user)
    async fn insert_cache_use(&self, resource_cache_id: i64, user: ResourceUser)
        -> RadarResult<()>;

    async fn cache_uses(&self, resource_cache_id: i64) -> RadarResult<Vec<ResourceUser>>;

    async fn delete_config_uses(&self, predicate: UsePredicate) -> RadarResult<Vec<DeletedUse>>;

    async fn delete_cache_uses(&self, predicate: UsePredicate) -> RadarResult<Vec<DeletedUse>>;

    // Collection

    /// Delete configs with no uses and no caches, returning what was deleted
    async fn delete_unreferenced_configs(&self) -> RadarResult<Vec<ResourceConfigRow>>;

    /// Delete caches with no uses and no configs created by them
    async fn delete_unreferenced_caches(&self) -> RadarResult<Vec<ResourceCacheRow>>;

    // Checking

    /// Take the lock unless someone else holds an unexpired lease on it
    async fn try_acquire_lock(
        &self,
        id: LockId,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> RadarResult<bool>;

    /// Release the lock if `owner` still holds it
    async fn release_lock(&self, id: LockId, owner: &str) -> RadarResult<()>;

    async fn last_checked(&self, resource_config_id: i64) -> RadarResult<Option<DateTime<Utc>>>;

    async fn set_last_checked(&self, resource_config_id: i64, at: DateTime<Utc>)
        -> RadarResult<()>;

    // Check sessions

    /// A session for the config expiring strictly after `expires_after`
    async fn find_check_session(
        &self,
        resource_config_id: i64,
        expires_after: DateTime<Utc>,
    ) -> RadarResult<Option<CheckSessionRow>>;

    async fn create_check_session(
        &self,
        resource_config_id: i64,
        expires_at: DateTime<Utc>,
    ) -> RadarResult<CheckSessionRow>;

    async fn delete_expired_check_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> RadarResult<Vec<CheckSessionRow>>;

    // Pipelines and builds

    async fn create_pipeline(&self, team_id: i64, name: &str) -> RadarResult<i64>;

    async fn pipeline(&self, id: i64) -> RadarResult<Option<PipelineRow>>;

    async fn set_pipeline_paused(&self, id: i64, paused: bool) -> RadarResult<()>;

    /// Remove a pipeline; its resources and resource types are detached, not deleted
    async fn delete_pipeline(&self, id: i64) -> RadarResult<()>;

    async fn create_build(&self, interceptible: bool) -> RadarResult<i64>;

    async fn finish_build(&self, id: i64) -> RadarResult<()>;

    async fn set_build_interceptible(&self, id: i64, interceptible: bool) -> RadarResult<()>;

    // Resources and resource types

    /// Insert or update by (pipeline, name); marks the entity active
    async fn save_checkable(
        &self,
        kind: CheckableKind,
        pipeline_id: i64,
        def: &CheckableDef,
    ) -> RadarResult<i64>;

    async fn checkable(
        &self,
        kind: CheckableKind,
        pipeline_id: i64,
        name: &str,
    ) -> RadarResult<Option<Checkable>>;

    async fn checkables(&self, kind: CheckableKind, pipeline_id: i64)
        -> RadarResult<Vec<Checkable>>;

    async fn set_checkable_active(&self, kind: CheckableKind, id: i64, active: bool)
        -> RadarResult<()>;

    async fn save_checkable_version(
        &self,
        kind: CheckableKind,
        id: i64,
        version: &Version,
    ) -> RadarResult<()>;

    async fn set_checkable_config(
        &self,
        kind: CheckableKind,
        id: i64,
        resource_config_id: i64,
    ) -> RadarResult<()>;

    async fn set_check_error(
        &self,
        kind: CheckableKind,
        id: i64,
        error: Option<&str>,
    ) -> RadarResult<()>;

    async fn stats(&self) -> RadarResult<StoreStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_use_predicates_skip_outdated() {
        assert!(UsePredicate::CONFIG_USES.contains(&UsePredicate::OutdatedResourceConfigs));
        assert!(!UsePredicate::CACHE_USES.contains(&UsePredicate::OutdatedResourceConfigs));
    }

    #[test]
    fn checkable_kind_users() {
        assert_eq!(CheckableKind::Resource.user(4), ResourceUser::Resource(4));
        assert_eq!(
            CheckableKind::ResourceType.user(4),
            ResourceUser::ResourceType(4)
        );
    }
}
