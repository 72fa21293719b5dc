//! Check session lifecycle

use crate::error::RadarResult;
use crate::lock::expiry_after;
use crate::resource::UsedResourceConfig;
use crate::session::state::{CheckSession, ContainerExpiries};
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Hands out check sessions, reusing one while it has enough life left
#[derive(Clone)]
pub struct CheckSessionFactory {
    store: Arc<dyn Store>,
    expiries: ContainerExpiries,
}

impl CheckSessionFactory {
    pub fn new(store: Arc<dyn Store>, expiries: ContainerExpiries) -> Self {
        Self { store, expiries }
    }

    pub fn expiries(&self) -> ContainerExpiries {
        self.expiries
    }

    /// Session for `config`, checked every `interval`
    pub async fn find_or_create(
        &self,
        config: &UsedResourceConfig,
        interval: Duration,
    ) -> RadarResult<CheckSession> {
        let now = Utc::now();
        let reuse_until = expiry_after(now, self.expiries.grace);

        if let Some(row) = self.store.find_check_session(config.id, reuse_until).await? {
            debug!(
                check_session_id = row.id,
                resource_config_id = config.id,
                "Reusing check session"
            );
            return Ok(CheckSession {
                id: row.id,
                resource_config: config.clone(),
                expires_at: row.expires_at,
            });
        }

        let expires_at = expiry_after(now, self.expiries.lifetime(interval));
        let row = self
            .store
            .create_check_session(config.id, expires_at)
            .await?;
        debug!(
            check_session_id = row.id,
            resource_config_id = config.id,
            expires_at = %row.expires_at,
            "Created check session"
        );

        Ok(CheckSession {
            id: row.id,
            resource_config: config.clone(),
            expires_at: row.expires_at,
        })
    }
}
