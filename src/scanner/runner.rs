//! Periodic scanning of a whole pipeline

use super::{ScanOutcome, Scanner};
use crate::error::RadarResult;
use crate::store::CheckableKind;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of scanning one entity during a tick
#[derive(Debug)]
pub struct ScanReport {
    pub kind: CheckableKind,
    pub name: String,
    pub result: RadarResult<ScanOutcome>,
}

/// Runs periodic scans over every active entity of one pipeline
#[derive(Clone)]
pub struct ScanRunner {
    scanner: Arc<Scanner>,
}

impl ScanRunner {
    pub fn new(scanner: Arc<Scanner>) -> Self {
        Self { scanner }
    }

    /// Scan every active resource type, then every resource.
    ///
    /// Types go first so resources built on them see fresh versions. One
    /// failing entity does not stop the others.
    pub async fn tick(&self) -> RadarResult<Vec<ScanReport>> {
        let mut reports = self.scan_all(CheckableKind::ResourceType).await?;
        reports.extend(self.scan_all(CheckableKind::Resource).await?);

        for report in &reports {
            match &report.result {
                Ok(outcome) => {
                    debug!(kind = %report.kind, name = %report.name, %outcome, "Scanned")
                }
                Err(e) => warn!(kind = %report.kind, name = %report.name, "Scan failed: {}", e),
            }
        }

        Ok(reports)
    }

    async fn scan_all(&self, kind: CheckableKind) -> RadarResult<Vec<ScanReport>> {
        let names: Vec<String> = self
            .scanner
            .pipeline()
            .checkables(kind)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();

        let scans = names.into_iter().map(|name| async move {
            let result = self.scanner.run(kind, &name).await;
            ScanReport { kind, name, result }
        });

        Ok(join_all(scans).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::fake::FakeChecker;
    use crate::config::Config;
    use crate::pipeline::DbPipeline;
    use crate::resource::{Source, Version};
    use crate::store::{CheckableDef, MemoryStore, Store};

    #[tokio::test]
    async fn tick_scans_everything_and_keeps_going() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let pipeline_id = store.create_pipeline(1, "main").await.unwrap();
        for (kind, name, type_name) in [
            (CheckableKind::ResourceType, "slack", "registry-image"),
            (CheckableKind::Resource, "notify", "slack"),
            (CheckableKind::Resource, "repo", "git"),
            (CheckableKind::Resource, "broken", "s3"),
        ] {
            store
                .save_checkable(
                    kind,
                    pipeline_id,
                    &CheckableDef::new(name, type_name, Source::new().with("name", name)),
                )
                .await
                .unwrap();
        }

        let checker = Arc::new(FakeChecker::new());
        let image = Version::from_pairs([("digest", "sha256:1")]);
        checker.returns("registry-image", vec![image.clone()]);
        checker.returns("git", vec![Version::from_pairs([("ref", "abc")])]);
        checker.cannot_run("s3", "no workers");

        let pipeline = Arc::new(DbPipeline::load(store.clone(), pipeline_id).await.unwrap());
        let scanner = Scanner::new(store.clone(), pipeline, checker.clone(), &Config::default());
        let reports = ScanRunner::new(Arc::new(scanner)).tick().await.unwrap();

        assert_eq!(reports.len(), 4);
        assert_eq!(reports[0].name, "slack");
        let broken = reports.iter().find(|r| r.name == "broken").unwrap();
        assert!(broken.result.is_err());
        let repo = reports.iter().find(|r| r.name == "repo").unwrap();
        assert!(matches!(repo.result, Ok(ScanOutcome::Checked { .. })));

        let slack = store
            .checkable(CheckableKind::ResourceType, pipeline_id, "slack")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(slack.version, Some(image));
    }
}
