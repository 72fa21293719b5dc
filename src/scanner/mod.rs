//! Version scanner
//!
//! Checks resources and resource types for new versions. One scan walks:
//!
//! 1. Dependencies: every unversioned custom type the target is built on is
//!    scanned first (deepest ancestor first), forced to complete.
//! 2. Identity: the target's config is resolved, used and attached to it.
//! 3. Interval gate: unforced scans of recently checked configs stop here.
//! 4. Locking: one checking lock per config. Unforced scans give up at once;
//!    forced scans retry with a fixed backoff, a bounded number of times.
//! 5. Checking: skipped for paused pipelines, otherwise the checker runs from
//!    the current version and the newest version it reports is saved.
//!
//! The lock is released on every path out of steps 4 and 5.

pub mod outcome;
pub mod runner;

pub use outcome::{ScanOutcome, SkipReason};
pub use runner::{ScanReport, ScanRunner};

use crate::cache::ResourceConfigFactory;
use crate::checker::{CheckError, CheckRequest, Checker};
use crate::config::Config;
use crate::error::{RadarError, RadarResult};
use crate::lock::{Lock, LockFactory, LockId};
use crate::pipeline::Pipeline;
use crate::resource::{dependency_chain, resolve, ResourceTypes, UsedResourceConfig, Version};
use crate::session::{CheckSession, CheckSessionFactory, ContainerExpiries};
use crate::store::{Checkable, CheckableKind, Store};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Scanner tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerSettings {
    /// Used when an entity has no `check_every` of its own
    pub default_interval: Duration,
    pub lock_retry_backoff: Duration,
    pub lock_retry_max_attempts: u32,
}

impl ScannerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_interval: config.scanner.default_check_interval(),
            lock_retry_backoff: config.scanner.lock_retry_backoff(),
            lock_retry_max_attempts: config.scanner.lock_retry_max_attempts.max(1),
        }
    }
}

/// Checks one pipeline's resources and resource types
pub struct Scanner {
    store: Arc<dyn Store>,
    pipeline: Arc<dyn Pipeline>,
    checker: Arc<dyn Checker>,
    configs: ResourceConfigFactory,
    sessions: CheckSessionFactory,
    settings: ScannerSettings,
}

impl Scanner {
    pub fn new(
        store: Arc<dyn Store>,
        pipeline: Arc<dyn Pipeline>,
        checker: Arc<dyn Checker>,
        config: &Config,
    ) -> Self {
        let locks = LockFactory::new(store.clone(), config.scanner.lock_ttl());
        Self {
            configs: ResourceConfigFactory::new(store.clone(), locks),
            sessions: CheckSessionFactory::new(
                store.clone(),
                ContainerExpiries::from_config(&config.check_sessions),
            ),
            settings: ScannerSettings::from_config(config),
            store,
            pipeline,
            checker,
        }
    }

    pub fn pipeline(&self) -> &Arc<dyn Pipeline> {
        &self.pipeline
    }

    /// Periodic scan: respects the interval and gives up if the lock is busy
    pub async fn run(&self, kind: CheckableKind, name: &str) -> RadarResult<ScanOutcome> {
        self.prescan(kind, name, None, false).await
    }

    /// Forced scan: ignores the interval and waits for the lock
    pub async fn scan(&self, kind: CheckableKind, name: &str) -> RadarResult<ScanOutcome> {
        self.prescan(kind, name, None, true).await
    }

    /// Forced scan starting from `from_version` instead of the current version
    pub async fn scan_from_version(
        &self,
        kind: CheckableKind,
        name: &str,
        from_version: Version,
    ) -> RadarResult<ScanOutcome> {
        self.prescan(kind, name, Some(from_version), true).await
    }

    async fn target(&self, kind: CheckableKind, name: &str) -> RadarResult<Checkable> {
        self.pipeline
            .checkable(kind, name)
            .await?
            .ok_or_else(|| match kind {
                CheckableKind::Resource => RadarError::ResourceNotFound(name.to_string()),
                CheckableKind::ResourceType => RadarError::ResourceTypeNotFound(name.to_string()),
            })
    }

    /// Custom types visible to `target`; a type never resolves through itself
    async fn visible_types(&self, target: &Checkable) -> RadarResult<ResourceTypes> {
        let types = self.pipeline.resource_types().await?;
        Ok(match target.kind {
            CheckableKind::ResourceType => types.without(&target.name),
            CheckableKind::Resource => types,
        })
    }

    async fn prescan(
        &self,
        kind: CheckableKind,
        name: &str,
        from_version: Option<Version>,
        must_complete: bool,
    ) -> RadarResult<ScanOutcome> {
        let target = self.target(kind, name).await?;
        let types = self.visible_types(&target).await?;

        for dependency in dependency_chain(&target.type_name, &types)? {
            if dependency.version.is_some() {
                continue;
            }
            debug!(
                target = %name,
                dependency = %dependency.name,
                "Scanning unversioned resource type first"
            );
            let outcome = self
                .scan_one(CheckableKind::ResourceType, &dependency.name, None, true)
                .await?;
            debug!(dependency = %dependency.name, %outcome, "Dependency scanned");
        }

        self.scan_one(kind, name, from_version, must_complete).await
    }

    async fn scan_one(
        &self,
        kind: CheckableKind,
        name: &str,
        from_version: Option<Version>,
        must_complete: bool,
    ) -> RadarResult<ScanOutcome> {
        // Reload: a dependency scan may just have versioned one of our types
        let target = self.target(kind, name).await?;
        let types = self.visible_types(&target).await?;

        let config = match resolve(&target.type_name, &target.source, &types) {
            Err(RadarError::ResourceTypeUnversioned(dependency)) => {
                info!(%kind, name, %dependency, "Dependency has no version yet; skipping");
                return Ok(ScanOutcome::Skipped(SkipReason::DependencyUnversioned(
                    dependency,
                )));
            }
            other => other?,
        };

        let used = self.configs.use_resource_config(target.user(), &config).await?;
        self.store
            .set_checkable_config(kind, target.id, used.id)
            .await?;

        let interval = target.check_every.unwrap_or(self.settings.default_interval);
        let session = self.sessions.find_or_create(&used, interval).await?;

        if !must_complete && !self.interval_elapsed(&used, interval).await? {
            debug!(%kind, name, "Checked recently; skipping");
            return Ok(ScanOutcome::Skipped(SkipReason::IntervalNotElapsed));
        }

        let Some(lock) = self.acquire_lock(&used, must_complete).await? else {
            debug!(%kind, name, "Lock held elsewhere");
            return Ok(ScanOutcome::LockUnavailable);
        };

        let result = self
            .check_locked(&target, &used, &session, from_version, types, interval, must_complete)
            .await;

        if let Err(e) = lock.release().await {
            warn!(%kind, name, "Failed to release checking lock: {}", e);
        }

        result
    }

    async fn interval_elapsed(
        &self,
        used: &UsedResourceConfig,
        interval: Duration,
    ) -> RadarResult<bool> {
        let Some(last) = self.store.last_checked(used.id).await? else {
            return Ok(true);
        };
        let Ok(interval) = chrono::Duration::from_std(interval) else {
            return Ok(false);
        };
        Ok(last
            .checked_add_signed(interval)
            .is_some_and(|due| Utc::now() >= due))
    }

    async fn acquire_lock(
        &self,
        used: &UsedResourceConfig,
        must_complete: bool,
    ) -> RadarResult<Option<Lock>> {
        let attempts = self.settings.lock_retry_max_attempts;
        for attempt in 1..=attempts {
            if let Some(lock) = self.configs.try_checking_lock(used).await? {
                return Ok(Some(lock));
            }
            if !must_complete {
                return Ok(None);
            }
            debug!(
                resource_config_id = used.id,
                attempt, "Waiting for checking lock"
            );
            tokio::time::sleep(self.settings.lock_retry_backoff).await;
        }

        Err(RadarError::LockContention {
            lock: LockId::resource_config_checking(used.id).to_string(),
            attempts,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn check_locked(
        &self,
        target: &Checkable,
        used: &UsedResourceConfig,
        session: &CheckSession,
        from_version: Option<Version>,
        types: ResourceTypes,
        interval: Duration,
        must_complete: bool,
    ) -> RadarResult<ScanOutcome> {
        let kind = target.kind;
        let name = target.name.as_str();

        // Someone else may have checked while we waited for the lock
        if !must_complete && !self.interval_elapsed(used, interval).await? {
            return Ok(ScanOutcome::Skipped(SkipReason::IntervalNotElapsed));
        }

        if self.pipeline.is_paused().await? {
            debug!(%kind, name, "Pipeline paused");
            return Ok(ScanOutcome::Skipped(SkipReason::PipelinePaused));
        }

        self.store.set_last_checked(used.id, Utc::now()).await?;

        let from_version = from_version.or_else(|| target.version.clone());
        let team_id = self.pipeline.team_id();
        let request = CheckRequest {
            type_name: target.type_name.clone(),
            source: target.source.clone(),
            from_version: from_version.clone(),
            resource_types: types,
            team_id,
            owner: session.owner(team_id),
        };

        let versions = match self.checker.check(&request).await {
            Ok(versions) => versions,
            Err(CheckError::ScriptFailed {
                exit_status,
                stderr,
            }) => {
                info!(%kind, name, exit_status, "Check failed");
                let message = format!("exit status {}: {}", exit_status, stderr.trim());
                self.store
                    .set_check_error(kind, target.id, Some(&message))
                    .await?;
                return Ok(ScanOutcome::CheckFailed { exit_status });
            }
            Err(CheckError::Execution(reason)) => {
                error!(%kind, name, "Failed to run check: {}", reason);
                self.store
                    .set_check_error(kind, target.id, Some(&reason))
                    .await?;
                return Err(RadarError::CheckFailed(reason));
            }
        };

        if target.check_error.is_some() {
            self.store.set_check_error(kind, target.id, None).await?;
        }

        let unchanged = match (versions.as_slice(), &from_version) {
            ([], _) => true,
            ([only], Some(from)) => only == from,
            _ => false,
        };
        let Some(latest) = versions.last().filter(|_| !unchanged) else {
            debug!(%kind, name, "No new versions");
            return Ok(ScanOutcome::NoNewVersions);
        };

        info!(
            %kind,
            name,
            total = versions.len(),
            version = %latest,
            "Found new versions"
        );
        self.store
            .save_checkable_version(kind, target.id, latest)
            .await?;

        Ok(ScanOutcome::Checked {
            discovered: versions.len(),
            version: latest.clone(),
        })
    }
}
