//! Expired check session collector

use super::Collector;
use crate::audit::AuditLog;
use crate::error::RadarResult;
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Deletes check sessions past their expiry
pub struct CheckSessionCollector {
    store: Arc<dyn Store>,
    audit: AuditLog,
}

impl CheckSessionCollector {
    pub fn new(store: Arc<dyn Store>, audit: AuditLog) -> Self {
        Self { store, audit }
    }
}

#[async_trait]
impl Collector for CheckSessionCollector {
    fn name(&self) -> &'static str {
        "check-sessions"
    }

    async fn run(&self) -> RadarResult<usize> {
        let expired = self.store.delete_expired_check_sessions(Utc::now()).await?;

        for session in &expired {
            debug!(
                check_session_id = session.id,
                resource_config_id = session.resource_config_id,
                "Deleted expired check session"
            );
            self.audit
                .log(
                    "gc.check_session.deleted",
                    &json!({
                        "check_session_id": session.id,
                        "resource_config_id": session.resource_config_id,
                        "expires_at": session.expires_at.to_rfc3339(),
                    }),
                )
                .await;
        }

        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResourceConfigFactory;
    use crate::lock::LockFactory;
    use crate::resource::{ResourceConfig, ResourceUser, Source};
    use crate::store::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn only_expired_sessions_go() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let build = store.create_build(false).await.unwrap();
        let used = ResourceConfigFactory::new(
            store.clone(),
            LockFactory::new(store.clone(), Duration::from_secs(60)),
        )
        .use_resource_config(
            ResourceUser::Build(build),
            &ResourceConfig::base("git", Source::new()),
        )
        .await
        .unwrap();

        let past = Utc::now() - chrono::Duration::minutes(1);
        let future = Utc::now() + chrono::Duration::minutes(10);
        let expired = store.create_check_session(used.id, past).await.unwrap();
        let live = store.create_check_session(used.id, future).await.unwrap();

        let collector = CheckSessionCollector::new(store.clone(), AuditLog::disabled());
        assert_eq!(collector.run().await.unwrap(), 1);
        assert_eq!(collector.run().await.unwrap(), 0);

        let found = store
            .find_check_session(used.id, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, live.id);
        assert_ne!(found.id, expired.id);
    }
}
