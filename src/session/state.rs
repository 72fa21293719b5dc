//! Check session records and their lifetimes

use crate::config::CheckSessionConfig;
use crate::resource::UsedResourceConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Lifetime bounds for check sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerExpiries {
    /// Sessions with less than this left are not handed out again
    pub grace: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl ContainerExpiries {
    pub fn from_config(config: &CheckSessionConfig) -> Self {
        Self {
            grace: Duration::from_secs(config.expiry_grace_secs),
            min: Duration::from_secs(config.min_expiry_secs),
            max: Duration::from_secs(config.max_expiry_secs),
        }
    }

    /// Lifetime of a new session for a check running every `interval`
    pub fn lifetime(&self, interval: Duration) -> Duration {
        // `clamp` panics if min > max; a misconfigured max wins
        interval.max(self.min).min(self.max)
    }
}

impl Default for ContainerExpiries {
    fn default() -> Self {
        Self::from_config(&CheckSessionConfig::default())
    }
}

/// A lease on the check container for one resource config
#[derive(Debug, Clone, PartialEq)]
pub struct CheckSession {
    pub id: i64,
    pub resource_config: UsedResourceConfig,
    pub expires_at: DateTime<Utc>,
}

impl CheckSession {
    /// Identity the checker's container is owned by
    pub fn owner(&self, team_id: i64) -> SessionOwner {
        SessionOwner {
            check_session_id: self.id,
            resource_config_id: self.resource_config.id,
            team_id,
        }
    }
}

/// Owner recorded on a check container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionOwner {
    pub check_session_id: i64,
    pub resource_config_id: i64,
    pub team_id: i64,
}
