use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::debug;

use tollgate_lock::clock::{Clock, TokioClock};
use tollgate_lock::error::LockError;
use tollgate_lock::key::LockKey;
use tollgate_lock::store::LockStore;
use tollgate_lock::token::LockToken;

/// Internal entry representing a stored lock record.
#[derive(Debug, Clone)]
struct LockRecord {
    token: LockToken,
    expires_at: Instant,
}

impl LockRecord {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory [`LockStore`] backed by a [`DashMap`].
///
/// Every operation runs under the shard lock of its key, which makes the
/// conditional write and delete atomic. Expiry is lazy: an expired record is
/// overwritten by the next acquirer or dropped by
/// [`purge_expired`](Self::purge_expired).
///
/// Clones share the same records, so one store can back several
/// coordinators within a process.
#[derive(Clone)]
pub struct MemoryLockStore {
    records: Arc<DashMap<LockKey, LockRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            clock: Arc::new(TokioClock),
        }
    }
}

impl std::fmt::Debug for MemoryLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLockStore")
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl MemoryLockStore {
    /// Create a new in-memory lock store on the tokio clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that expires records by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Number of live (non-expired) records.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.records.iter().filter(|r| r.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| record.is_live(now));
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            debug!(purged, "purged expired lock records");
        }
        purged
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire(
        &self,
        key: &LockKey,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = self.clock.now();
        let record = LockRecord {
            token: token.clone(),
            expires_at: expiry(now, ttl)?,
        };

        match self.records.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(record);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &LockKey, token: &LockToken) -> Result<bool, LockError> {
        let now = self.clock.now();
        let removed = self
            .records
            .remove_if(key, |_, record| &record.token == token && record.is_live(now));
        Ok(removed.is_some())
    }

    async fn refresh(
        &self,
        key: &LockKey,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl)?;
        match self.records.get_mut(key) {
            Some(mut record) if &record.token == token && record.is_live(now) => {
                record.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn expiry(now: Instant, ttl: Duration) -> Result<Instant, LockError> {
    now.checked_add(ttl)
        .ok_or_else(|| LockError::InvalidConfiguration(format!("ttl {ttl:?} is out of range")))
}
