//! Pipeline view used by the scanner

use crate::error::{RadarError, RadarResult};
use crate::resource::ResourceTypes;
use crate::store::{Checkable, CheckableKind, Store};
use async_trait::async_trait;
use std::sync::Arc;

/// The slice of a pipeline the scanner reads
#[async_trait]
pub trait Pipeline: Send + Sync {
    fn id(&self) -> i64;

    fn team_id(&self) -> i64;

    async fn is_paused(&self) -> RadarResult<bool>;

    /// Active resource or resource type named `name`
    async fn checkable(&self, kind: CheckableKind, name: &str) -> RadarResult<Option<Checkable>>;

    /// All active resources or resource types
    async fn checkables(&self, kind: CheckableKind) -> RadarResult<Vec<Checkable>>;

    async fn resource_type(&self, name: &str) -> RadarResult<Option<Checkable>> {
        self.checkable(CheckableKind::ResourceType, name).await
    }

    async fn resource(&self, name: &str) -> RadarResult<Option<Checkable>> {
        self.checkable(CheckableKind::Resource, name).await
    }

    /// Active custom types with their current versions, for identity resolution
    async fn resource_types(&self) -> RadarResult<ResourceTypes> {
        Ok(self
            .checkables(CheckableKind::ResourceType)
            .await?
            .iter()
            .map(Checkable::to_type_def)
            .collect())
    }
}

/// Pipeline backed by the store; every read goes to the store
#[derive(Clone)]
pub struct DbPipeline {
    store: Arc<dyn Store>,
    id: i64,
    team_id: i64,
}

impl DbPipeline {
    pub async fn load(store: Arc<dyn Store>, id: i64) -> RadarResult<Self> {
        let row = store
            .pipeline(id)
            .await?
            .ok_or(RadarError::PipelineNotFound(id))?;
        Ok(Self {
            store,
            id: row.id,
            team_id: row.team_id,
        })
    }
}

#[async_trait]
impl Pipeline for DbPipeline {
    fn id(&self) -> i64 {
        self.id
    }

    fn team_id(&self) -> i64 {
        self.team_id
    }

    async fn is_paused(&self) -> RadarResult<bool> {
        let row = self
            .store
            .pipeline(self.id)
            .await?
            .ok_or(RadarError::PipelineNotFound(self.id))?;
        Ok(row.paused)
    }

    async fn checkable(&self, kind: CheckableKind, name: &str) -> RadarResult<Option<Checkable>> {
        Ok(self
            .store
            .checkable(kind, self.id, name)
            .await?
            .filter(|c| c.active))
    }

    async fn checkables(&self, kind: CheckableKind) -> RadarResult<Vec<Checkable>> {
        let mut all = self.store.checkables(kind, self.id).await?;
        all.retain(|c| c.active);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Source;
    use crate::store::{CheckableDef, MemoryStore};

    #[tokio::test]
    async fn inactive_entries_are_hidden() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let id = store.create_pipeline(1, "main").await.unwrap();
        let kept = store
            .save_checkable(
                CheckableKind::ResourceType,
                id,
                &CheckableDef::new("kept", "registry-image", Source::new()),
            )
            .await
            .unwrap();
        let dropped = store
            .save_checkable(
                CheckableKind::ResourceType,
                id,
                &CheckableDef::new("dropped", "registry-image", Source::new()),
            )
            .await
            .unwrap();
        store
            .set_checkable_active(CheckableKind::ResourceType, dropped, false)
            .await
            .unwrap();

        let pipeline = DbPipeline::load(store, id).await.unwrap();
        let types = pipeline.resource_types().await.unwrap();
        assert_eq!(types.len(), 1);
        assert!(types.lookup("kept").is_some());
        assert_eq!(pipeline.resource_type("kept").await.unwrap().map(|c| c.id), Some(kept));
        assert!(pipeline.resource_type("dropped").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pause_is_read_through() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let id = store.create_pipeline(7, "main").await.unwrap();
        let pipeline = DbPipeline::load(store.clone(), id).await.unwrap();

        assert_eq!(pipeline.team_id(), 7);
        assert!(!pipeline.is_paused().await.unwrap());
        store.set_pipeline_paused(id, true).await.unwrap();
        assert!(pipeline.is_paused().await.unwrap());
    }

    #[tokio::test]
    async fn missing_pipeline() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        assert!(matches!(
            DbPipeline::load(store, 42).await,
            Err(RadarError::PipelineNotFound(42))
        ));
    }
}
