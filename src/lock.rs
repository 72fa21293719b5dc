//! Cross-process advisory locks
//!
//! Locks live in the store as leases keyed by `(kind, object id)`. A lease
//! that outlives its holder simply expires. Locks are not re-entrant: every
//! acquisition attempt carries a fresh owner token, so a second attempt from
//! the same process fails while the first lease is held.

use crate::error::RadarResult;
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Families of locks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Serializes checks of one resource config
    ResourceConfigChecking,
}

impl LockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceConfigChecking => "resource-config-checking",
        }
    }
}

/// Identity of a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockId {
    pub kind: LockKind,
    pub object_id: i64,
}

impl LockId {
    pub fn new(kind: LockKind, object_id: i64) -> Self {
        Self { kind, object_id }
    }

    pub fn resource_config_checking(resource_config_id: i64) -> Self {
        Self::new(LockKind::ResourceConfigChecking, resource_config_id)
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.object_id)
    }
}

/// A held lease; released explicitly or, failing that, on drop
pub struct Lock {
    id: LockId,
    owner: String,
    store: Arc<dyn Store>,
    released: bool,
}

impl Lock {
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Release the lease now
    pub async fn release(mut self) -> RadarResult<()> {
        self.released = true;
        self.store.release_lock(self.id, &self.owner).await?;
        debug!(lock = %self.id, "Released lock");
        Ok(())
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                let owner = std::mem::take(&mut self.owner);
                handle.spawn(async move {
                    if let Err(e) = store.release_lock(id, &owner).await {
                        warn!(lock = %id, "Failed to release dropped lock: {}", e);
                    }
                });
            }
            Err(_) => {
                // Outside a runtime the lease is left to expire
                warn!(lock = %id, "Lock dropped without a runtime; lease will expire");
            }
        }
    }
}

/// `start + length`, saturating at the latest representable instant
pub(crate) fn expiry_after(start: DateTime<Utc>, length: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(length)
        .ok()
        .and_then(|length| start.checked_add_signed(length))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Hands out leases against a store
#[derive(Clone)]
pub struct LockFactory {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl LockFactory {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Try once to take the lock; `None` if someone else holds it
    pub async fn try_acquire(&self, id: LockId) -> RadarResult<Option<Lock>> {
        let owner = Uuid::new_v4().to_string();
        let expires_at = expiry_after(Utc::now(), self.ttl);

        if !self.store.try_acquire_lock(id, &owner, expires_at).await? {
            debug!(lock = %id, "Lock held elsewhere");
            return Ok(None);
        }

        debug!(lock = %id, "Acquired lock");
        Ok(Some(Lock {
            id,
            owner,
            store: Arc::clone(&self.store),
            released: false,
        }))
    }
}
