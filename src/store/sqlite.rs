//! SQLite-backed store
//!
//! Several scanner and collector processes on one host can share the same
//! database file. Constraint races surface as `UniqueViolation` and
//! `ForeignKeyViolation` through the `From<sqlx::Error>` conversion.

use crate::config::StoreConfig;
use crate::error::{RadarError, RadarResult};
use crate::lock::LockId;
use crate::resource::{MetadataField, ResourceUser, Source, Version};
use crate::store::{
    CheckSessionRow, Checkable, CheckableDef, CheckableKind, ConfigParent, DeletedUse,
    PipelineRow, ResourceCacheRow, ResourceConfigRow, Store, StoreStats, UsePredicate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const MIGRATIONS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS pipelines (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        team_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        paused INTEGER NOT NULL DEFAULT 0,
        UNIQUE (team_id, name)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS builds (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        finished INTEGER NOT NULL DEFAULT 0,
        interceptible INTEGER NOT NULL DEFAULT 0
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS base_resource_types (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS resource_configs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        base_resource_type_id INTEGER REFERENCES base_resource_types (id),
        resource_cache_id INTEGER REFERENCES resource_caches (id),
        source_hash TEXT NOT NULL,
        CHECK ((base_resource_type_id IS NULL) <> (resource_cache_id IS NULL)),
        UNIQUE (base_resource_type_id, source_hash),
        UNIQUE (resource_cache_id, source_hash)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS resource_caches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        resource_config_id INTEGER NOT NULL REFERENCES resource_configs (id),
        version TEXT NOT NULL,
        params_hash TEXT NOT NULL,
        metadata TEXT,
        UNIQUE (resource_config_id, version, params_hash)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS resources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pipeline_id INTEGER REFERENCES pipelines (id) ON DELETE SET NULL,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        source TEXT NOT NULL,
        source_hash TEXT NOT NULL,
        version TEXT,
        check_every_ms INTEGER,
        active INTEGER NOT NULL DEFAULT 1,
        resource_config_id INTEGER REFERENCES resource_configs (id) ON DELETE SET NULL,
        check_error TEXT,
        UNIQUE (pipeline_id, name)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS resource_types (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pipeline_id INTEGER REFERENCES pipelines (id) ON DELETE SET NULL,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        source TEXT NOT NULL,
        source_hash TEXT NOT NULL,
        version TEXT,
        check_every_ms INTEGER,
        active INTEGER NOT NULL DEFAULT 1,
        resource_config_id INTEGER REFERENCES resource_configs (id) ON DELETE SET NULL,
        check_error TEXT,
        UNIQUE (pipeline_id, name)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS resource_config_uses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        resource_config_id INTEGER NOT NULL REFERENCES resource_configs (id),
        build_id INTEGER REFERENCES builds (id) ON DELETE CASCADE,
        resource_id INTEGER REFERENCES resources (id) ON DELETE CASCADE,
        resource_type_id INTEGER REFERENCES resource_types (id) ON DELETE CASCADE,
        CHECK ((build_id IS NOT NULL) + (resource_id IS NOT NULL) + (resource_type_id IS NOT NULL) = 1)
    )
    ",
    "CREATE UNIQUE INDEX IF NOT EXISTS resource_config_uses_build_uniq ON resource_config_uses (resource_config_id, build_id) WHERE build_id IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS resource_config_uses_resource_uniq ON resource_config_uses (resource_config_id, resource_id) WHERE resource_id IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS resource_config_uses_resource_type_uniq ON resource_config_uses (resource_config_id, resource_type_id) WHERE resource_type_id IS NOT NULL",
    r"
    CREATE TABLE IF NOT EXISTS resource_cache_uses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        resource_cache_id INTEGER NOT NULL REFERENCES resource_caches (id),
        build_id INTEGER REFERENCES builds (id) ON DELETE CASCADE,
        resource_id INTEGER REFERENCES resources (id) ON DELETE CASCADE,
        resource_type_id INTEGER REFERENCES resource_types (id) ON DELETE CASCADE,
        CHECK ((build_id IS NOT NULL) + (resource_id IS NOT NULL) + (resource_type_id IS NOT NULL) = 1)
    )
    ",
    "CREATE UNIQUE INDEX IF NOT EXISTS resource_cache_uses_build_uniq ON resource_cache_uses (resource_cache_id, build_id) WHERE build_id IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS resource_cache_uses_resource_uniq ON resource_cache_uses (resource_cache_id, resource_id) WHERE resource_id IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS resource_cache_uses_resource_type_uniq ON resource_cache_uses (resource_cache_id, resource_type_id) WHERE resource_type_id IS NOT NULL",
    r"
    CREATE TABLE IF NOT EXISTS resource_config_check_times (
        resource_config_id INTEGER PRIMARY KEY REFERENCES resource_configs (id) ON DELETE CASCADE,
        last_checked INTEGER NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS resource_config_check_sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        resource_config_id INTEGER NOT NULL REFERENCES resource_configs (id) ON DELETE CASCADE,
        expires_at INTEGER NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS locks (
        lock_kind TEXT NOT NULL,
        object_id INTEGER NOT NULL,
        owner TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        PRIMARY KEY (lock_kind, object_id)
    )
    ",
];

fn checkable_table(kind: CheckableKind) -> &'static str {
    match kind {
        CheckableKind::Resource => "resources",
        CheckableKind::ResourceType => "resource_types",
    }
}

/// `(build_id, resource_id, resource_type_id)` column values for a use row
fn user_columns(user: ResourceUser) -> (Option<i64>, Option<i64>, Option<i64>) {
    match user {
        ResourceUser::Build(id) => (Some(id), None, None),
        ResourceUser::Resource(id) => (None, Some(id), None),
        ResourceUser::ResourceType(id) => (None, None, Some(id)),
    }
}

fn user_from_row(row: &SqliteRow) -> RadarResult<ResourceUser> {
    let build: Option<i64> = row.try_get("build_id")?;
    let resource: Option<i64> = row.try_get("resource_id")?;
    let resource_type: Option<i64> = row.try_get("resource_type_id")?;
    match (build, resource, resource_type) {
        (Some(id), None, None) => Ok(ResourceUser::Build(id)),
        (None, Some(id), None) => Ok(ResourceUser::Resource(id)),
        (None, None, Some(id)) => Ok(ResourceUser::ResourceType(id)),
        _ => Err(RadarError::Internal(
            "use row must reference exactly one user".to_string(),
        )),
    }
}

fn from_millis(ms: i64) -> RadarResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| RadarError::Internal(format!("timestamp out of range: {}", ms)))
}

fn config_from_row(row: &SqliteRow) -> RadarResult<ResourceConfigRow> {
    let base: Option<i64> = row.try_get("base_resource_type_id")?;
    let cache: Option<i64> = row.try_get("resource_cache_id")?;
    let parent = match (base, cache) {
        (Some(id), None) => ConfigParent::BaseResourceType(id),
        (None, Some(id)) => ConfigParent::ResourceCache(id),
        _ => {
            return Err(RadarError::Internal(
                "resource config must have exactly one parent".to_string(),
            ))
        }
    };
    Ok(ResourceConfigRow {
        id: row.try_get("id")?,
        parent,
        source_hash: row.try_get("source_hash")?,
    })
}

fn cache_from_row(row: &SqliteRow) -> RadarResult<ResourceCacheRow> {
    let version: String = row.try_get("version")?;
    Ok(ResourceCacheRow {
        id: row.try_get("id")?,
        resource_config_id: row.try_get("resource_config_id")?,
        version: Version::from_json(&version)?,
        params_hash: row.try_get("params_hash")?,
    })
}

fn session_from_row(row: &SqliteRow) -> RadarResult<CheckSessionRow> {
    Ok(CheckSessionRow {
        id: row.try_get("id")?,
        resource_config_id: row.try_get("resource_config_id")?,
        expires_at: from_millis(row.try_get("expires_at")?)?,
    })
}

fn checkable_from_row(kind: CheckableKind, row: &SqliteRow) -> RadarResult<Checkable> {
    let source: String = row.try_get("source")?;
    let version: Option<String> = row.try_get("version")?;
    let check_every: Option<i64> = row.try_get("check_every_ms")?;
    Ok(Checkable {
        kind,
        id: row.try_get("id")?,
        pipeline_id: row.try_get("pipeline_id")?,
        name: row.try_get("name")?,
        type_name: row.try_get("type")?,
        source: Source::from_json(&source)?,
        source_hash: row.try_get("source_hash")?,
        version: version.as_deref().map(Version::from_json).transpose()?,
        check_every: check_every.map(|ms| Duration::from_millis(ms.max(0) as u64)),
        active: row.try_get("active")?,
        resource_config_id: row.try_get("resource_config_id")?,
        check_error: row.try_get("check_error")?,
    })
}

/// `WHERE` clause selecting the use rows a predicate removes, if any apply
fn use_predicate_clause(predicate: UsePredicate, uses_table: &str, target: &str) -> Option<String> {
    match predicate {
        UsePredicate::FinishedBuilds => Some(
            "build_id IN (SELECT id FROM builds WHERE finished = 1 AND interceptible = 0)"
                .to_string(),
        ),
        UsePredicate::InactiveResourceTypes => Some(
            "resource_type_id IN (SELECT id FROM resource_types WHERE active = 0)".to_string(),
        ),
        UsePredicate::InactiveResources => {
            Some("resource_id IN (SELECT id FROM resources WHERE active = 0)".to_string())
        }
        UsePredicate::RemovedPipelines => Some(
            "resource_id IN (SELECT id FROM resources WHERE pipeline_id IS NULL) \
             OR resource_type_id IN (SELECT id FROM resource_types WHERE pipeline_id IS NULL)"
                .to_string(),
        ),
        UsePredicate::OutdatedResourceConfigs if target == "resource_config_id" => Some(format!(
            "id IN (
                SELECT u.id FROM {uses} u
                JOIN resource_configs c ON c.id = u.resource_config_id
                LEFT JOIN resources r ON r.id = u.resource_id
                LEFT JOIN resource_types t ON t.id = u.resource_type_id
                WHERE (r.id IS NOT NULL AND r.source_hash <> c.source_hash)
                   OR (t.id IS NOT NULL AND t.source_hash <> c.source_hash)
            )",
            uses = uses_table
        )),
        UsePredicate::OutdatedResourceConfigs => None,
    }
}

/// Store over a SQLite connection pool
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema
    pub async fn connect(path: &Path, config: &StoreConfig) -> RadarResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    RadarError::io(format!("creating {}", parent.display()), e)
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        debug!(path = %path.display(), "Opened store");
        Ok(store)
    }

    async fn migrate(&self) -> RadarResult<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn count(&self, table: &str) -> RadarResult<u64> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn insert_use(
        &self,
        uses_table: &str,
        target: &str,
        target_id: i64,
        user: ResourceUser,
    ) -> RadarResult<()> {
        let (build, resource, resource_type) = user_columns(user);
        sqlx::query(&format!(
            "INSERT INTO {} ({}, build_id, resource_id, resource_type_id) VALUES (?, ?, ?, ?) \
             ON CONFLICT DO NOTHING",
            uses_table, target
        ))
        .bind(target_id)
        .bind(build)
        .bind(resource)
        .bind(resource_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn uses(
        &self,
        uses_table: &str,
        target: &str,
        target_id: i64,
    ) -> RadarResult<Vec<ResourceUser>> {
        let rows = sqlx::query(&format!(
            "SELECT build_id, resource_id, resource_type_id FROM {} WHERE {} = ? ORDER BY id",
            uses_table, target
        ))
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn delete_uses(
        &self,
        uses_table: &str,
        target: &str,
        predicate: UsePredicate,
    ) -> RadarResult<Vec<DeletedUse>> {
        let Some(clause) = use_predicate_clause(predicate, uses_table, target) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(&format!(
            "DELETE FROM {table} WHERE {clause} \
             RETURNING {target} AS target_id, build_id, resource_id, resource_type_id",
            table = uses_table,
            clause = clause,
            target = target
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> RadarResult<DeletedUse> {
                Ok(DeletedUse {
                    target_id: row.try_get("target_id")?,
                    user: user_from_row(row)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_base_resource_type(&self, name: &str) -> RadarResult<Option<i64>> {
        Ok(
            sqlx::query_scalar("SELECT id FROM base_resource_types WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn create_base_resource_type(&self, name: &str) -> RadarResult<i64> {
        Ok(
            sqlx::query_scalar("INSERT INTO base_resource_types (name) VALUES (?) RETURNING id")
                .bind(name)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn find_resource_config(
        &self,
        parent: ConfigParent,
        source_hash: &str,
    ) -> RadarResult<Option<i64>> {
        let query = match parent {
            ConfigParent::BaseResourceType(id) => sqlx::query_scalar(
                "SELECT id FROM resource_configs WHERE base_resource_type_id = ? AND source_hash = ?",
            )
            .bind(id),
            ConfigParent::ResourceCache(id) => sqlx::query_scalar(
                "SELECT id FROM resource_configs WHERE resource_cache_id = ? AND source_hash = ?",
            )
            .bind(id),
        };
        Ok(query.bind(source_hash).fetch_optional(&self.pool).await?)
    }

    async fn create_resource_config(
        &self,
        parent: ConfigParent,
        source_hash: &str,
    ) -> RadarResult<i64> {
        let (base, cache) = match parent {
            ConfigParent::BaseResourceType(id) => (Some(id), None),
            ConfigParent::ResourceCache(id) => (None, Some(id)),
        };
        Ok(sqlx::query_scalar(
            "INSERT INTO resource_configs (base_resource_type_id, resource_cache_id, source_hash) \
             VALUES (?, ?, ?) RETURNING id",
        )
        .bind(base)
        .bind(cache)
        .bind(source_hash)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn resource_config(&self, id: i64) -> RadarResult<Option<ResourceConfigRow>> {
        let row = sqlx::query(
            "SELECT id, base_resource_type_id, resource_cache_id, source_hash \
             FROM resource_configs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(config_from_row).transpose()
    }

    async fn find_resource_cache(
        &self,
        resource_config_id: i64,
        version: &Version,
        params_hash: &str,
    ) -> RadarResult<Option<i64>> {
        Ok(sqlx::query_scalar(
            "SELECT id FROM resource_caches \
             WHERE resource_config_id = ? AND version = ? AND params_hash = ?",
        )
        .bind(resource_config_id)
        .bind(version.to_canonical_json())
        .bind(params_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn create_resource_cache(
        &self,
        resource_config_id: i64,
        version: &Version,
        params_hash: &str,
    ) -> RadarResult<i64> {
        Ok(sqlx::query_scalar(
            "INSERT INTO resource_caches (resource_config_id, version, params_hash) \
             VALUES (?, ?, ?) RETURNING id",
        )
        .bind(resource_config_id)
        .bind(version.to_canonical_json())
        .bind(params_hash)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn resource_cache(&self, id: i64) -> RadarResult<Option<ResourceCacheRow>> {
        let row = sqlx::query(
            "SELECT id, resource_config_id, version, params_hash FROM resource_caches WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(cache_from_row).transpose()
    }

    async fn update_resource_cache_metadata(
        &self,
        id: i64,
        metadata: &[MetadataField],
    ) -> RadarResult<()> {
        let json = serde_json::to_string(metadata)?;
        let result = sqlx::query("UPDATE resource_caches SET metadata = ? WHERE id = ?")
            .bind(json)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RadarError::ResourceCacheNotFound(id));
        }
        Ok(())
    }

    async fn resource_cache_metadata(&self, id: i64) -> RadarResult<Vec<MetadataField>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT metadata FROM resource_caches WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            None => Err(RadarError::ResourceCacheNotFound(id)),
            Some((None,)) => Ok(Vec::new()),
            Some((Some(json),)) => Ok(serde_json::from_str(&json)?),
        }
    }

    async fn insert_config_use(
        &self,
        resource_config_id: i64,
        user: ResourceUser,
    ) -> RadarResult<()> {
        self.insert_use("resource_config_uses", "resource_config_id", resource_config_id, user)
            .await
    }

    async fn config_uses(&self, resource_config_id: i64) -> RadarResult<Vec<ResourceUser>> {
        self.uses("resource_config_uses", "resource_config_id", resource_config_id)
            .await
    }

    async fn insert_cache_use(
        &self,
        resource_cache_id: i64,
        user: ResourceUser,
    ) -> RadarResult<()> {
        self.insert_use("resource_cache_uses", "resource_cache_id", resource_cache_id, user)
            .await
    }

    async fn cache_uses(&self, resource_cache_id: i64) -> RadarResult<Vec<ResourceUser>> {
        self.uses("resource_cache_uses", "resource_cache_id", resource_cache_id)
            .await
    }

    async fn delete_config_uses(&self, predicate: UsePredicate) -> RadarResult<Vec<DeletedUse>> {
        self.delete_uses("resource_config_uses", "resource_config_id", predicate)
            .await
    }

    async fn delete_cache_uses(&self, predicate: UsePredicate) -> RadarResult<Vec<DeletedUse>> {
        self.delete_uses("resource_cache_uses", "resource_cache_id", predicate)
            .await
    }

    async fn delete_unreferenced_configs(&self) -> RadarResult<Vec<ResourceConfigRow>> {
        let rows = sqlx::query(
            "DELETE FROM resource_configs \
             WHERE id NOT IN (SELECT resource_config_id FROM resource_config_uses) \
               AND id NOT IN (SELECT resource_config_id FROM resource_caches) \
             RETURNING id, base_resource_type_id, resource_cache_id, source_hash",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(config_from_row).collect()
    }

    async fn delete_unreferenced_caches(&self) -> RadarResult<Vec<ResourceCacheRow>> {
        let rows = sqlx::query(
            "DELETE FROM resource_caches \
             WHERE id NOT IN (SELECT resource_cache_id FROM resource_cache_uses) \
               AND id NOT IN ( \
                   SELECT resource_cache_id FROM resource_configs \
                   WHERE resource_cache_id IS NOT NULL) \
             RETURNING id, resource_config_id, version, params_hash",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(cache_from_row).collect()
    }

    async fn try_acquire_lock(
        &self,
        id: LockId,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> RadarResult<bool> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT INTO locks (lock_kind, object_id, owner, expires_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT (lock_kind, object_id) DO UPDATE \
             SET owner = excluded.owner, expires_at = excluded.expires_at \
             WHERE locks.expires_at <= ?",
        )
        .bind(id.kind.as_str())
        .bind(id.object_id)
        .bind(owner)
        .bind(expires_at.timestamp_millis())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_lock(&self, id: LockId, owner: &str) -> RadarResult<()> {
        sqlx::query("DELETE FROM locks WHERE lock_kind = ? AND object_id = ? AND owner = ?")
            .bind(id.kind.as_str())
            .bind(id.object_id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn last_checked(&self, resource_config_id: i64) -> RadarResult<Option<DateTime<Utc>>> {
        let ms: Option<i64> = sqlx::query_scalar(
            "SELECT last_checked FROM resource_config_check_times WHERE resource_config_id = ?",
        )
        .bind(resource_config_id)
        .fetch_optional(&self.pool)
        .await?;
        ms.map(from_millis).transpose()
    }

    async fn set_last_checked(
        &self,
        resource_config_id: i64,
        at: DateTime<Utc>,
    ) -> RadarResult<()> {
        sqlx::query(
            "INSERT INTO resource_config_check_times (resource_config_id, last_checked) \
             VALUES (?, ?) \
             ON CONFLICT (resource_config_id) DO UPDATE SET last_checked = excluded.last_checked",
        )
        .bind(resource_config_id)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_check_session(
        &self,
        resource_config_id: i64,
        expires_after: DateTime<Utc>,
    ) -> RadarResult<Option<CheckSessionRow>> {
        let row = sqlx::query(
            "SELECT id, resource_config_id, expires_at FROM resource_config_check_sessions \
             WHERE resource_config_id = ? AND expires_at > ? \
             ORDER BY expires_at DESC LIMIT 1",
        )
        .bind(resource_config_id)
        .bind(expires_after.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn create_check_session(
        &self,
        resource_config_id: i64,
        expires_at: DateTime<Utc>,
    ) -> RadarResult<CheckSessionRow> {
        let row = sqlx::query(
            "INSERT INTO resource_config_check_sessions (resource_config_id, expires_at) \
             VALUES (?, ?) RETURNING id, resource_config_id, expires_at",
        )
        .bind(resource_config_id)
        .bind(expires_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;
        session_from_row(&row)
    }

    async fn delete_expired_check_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> RadarResult<Vec<CheckSessionRow>> {
        let rows = sqlx::query(
            "DELETE FROM resource_config_check_sessions WHERE expires_at <= ? \
             RETURNING id, resource_config_id, expires_at",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn create_pipeline(&self, team_id: i64, name: &str) -> RadarResult<i64> {
        Ok(
            sqlx::query_scalar("INSERT INTO pipelines (team_id, name) VALUES (?, ?) RETURNING id")
                .bind(team_id)
                .bind(name)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn pipeline(&self, id: i64) -> RadarResult<Option<PipelineRow>> {
        let row = sqlx::query("SELECT id, team_id, name, paused FROM pipelines WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> RadarResult<PipelineRow> {
            Ok(PipelineRow {
                id: row.try_get("id")?,
                team_id: row.try_get("team_id")?,
                name: row.try_get("name")?,
                paused: row.try_get("paused")?,
            })
        })
        .transpose()
    }

    async fn set_pipeline_paused(&self, id: i64, paused: bool) -> RadarResult<()> {
        let result = sqlx::query("UPDATE pipelines SET paused = ? WHERE id = ?")
            .bind(paused)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RadarError::PipelineNotFound(id));
        }
        Ok(())
    }

    async fn delete_pipeline(&self, id: i64) -> RadarResult<()> {
        let result = sqlx::query("DELETE FROM pipelines WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RadarError::PipelineNotFound(id));
        }
        Ok(())
    }

    async fn create_build(&self, interceptible: bool) -> RadarResult<i64> {
        Ok(
            sqlx::query_scalar("INSERT INTO builds (interceptible) VALUES (?) RETURNING id")
                .bind(interceptible)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn finish_build(&self, id: i64) -> RadarResult<()> {
        sqlx::query("UPDATE builds SET finished = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_build_interceptible(&self, id: i64, interceptible: bool) -> RadarResult<()> {
        sqlx::query("UPDATE builds SET interceptible = ? WHERE id = ?")
            .bind(interceptible)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_checkable(
        &self,
        kind: CheckableKind,
        pipeline_id: i64,
        def: &CheckableDef,
    ) -> RadarResult<i64> {
        let source = serde_json::to_string(&def.source)?;
        let check_every = def.check_every.map(|d| d.as_millis() as i64);
        Ok(sqlx::query_scalar(&format!(
            "INSERT INTO {} (pipeline_id, name, type, source, source_hash, check_every_ms, active) \
             VALUES (?, ?, ?, ?, ?, ?, 1) \
             ON CONFLICT (pipeline_id, name) DO UPDATE SET \
                 type = excluded.type, \
                 source = excluded.source, \
                 source_hash = excluded.source_hash, \
                 check_every_ms = excluded.check_every_ms, \
                 active = 1 \
             RETURNING id",
            checkable_table(kind)
        ))
        .bind(pipeline_id)
        .bind(&def.name)
        .bind(&def.type_name)
        .bind(source)
        .bind(def.source.hash())
        .bind(check_every)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn checkable(
        &self,
        kind: CheckableKind,
        pipeline_id: i64,
        name: &str,
    ) -> RadarResult<Option<Checkable>> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE pipeline_id = ? AND name = ?",
            checkable_table(kind)
        ))
        .bind(pipeline_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(|r| checkable_from_row(kind, r)).transpose()
    }

    async fn checkables(
        &self,
        kind: CheckableKind,
        pipeline_id: i64,
    ) -> RadarResult<Vec<Checkable>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} WHERE pipeline_id = ? ORDER BY id",
            checkable_table(kind)
        ))
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| checkable_from_row(kind, r)).collect()
    }

    async fn set_checkable_active(
        &self,
        kind: CheckableKind,
        id: i64,
        active: bool,
    ) -> RadarResult<()> {
        sqlx::query(&format!(
            "UPDATE {} SET active = ? WHERE id = ?",
            checkable_table(kind)
        ))
        .bind(active)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_checkable_version(
        &self,
        kind: CheckableKind,
        id: i64,
        version: &Version,
    ) -> RadarResult<()> {
        sqlx::query(&format!(
            "UPDATE {} SET version = ? WHERE id = ?",
            checkable_table(kind)
        ))
        .bind(version.to_canonical_json())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_checkable_config(
        &self,
        kind: CheckableKind,
        id: i64,
        resource_config_id: i64,
    ) -> RadarResult<()> {
        sqlx::query(&format!(
            "UPDATE {} SET resource_config_id = ? WHERE id = ?",
            checkable_table(kind)
        ))
        .bind(resource_config_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_check_error(
        &self,
        kind: CheckableKind,
        id: i64,
        error: Option<&str>,
    ) -> RadarResult<()> {
        sqlx::query(&format!(
            "UPDATE {} SET check_error = ? WHERE id = ?",
            checkable_table(kind)
        ))
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stats(&self) -> RadarResult<StoreStats> {
        Ok(StoreStats {
            base_resource_types: self.count("base_resource_types").await?,
            resource_configs: self.count("resource_configs").await?,
            resource_caches: self.count("resource_caches").await?,
            resource_config_uses: self.count("resource_config_uses").await?,
            resource_cache_uses: self.count("resource_cache_uses").await?,
            check_sessions: self.count("resource_config_check_sessions").await?,
            locks: self.count("locks").await?,
        })
    }
}
