//! Shared test tooling for lock stores.
//!
//! Backends call [`run_store_conformance_tests`] from their own test modules.
//! [`RecordingStore`] and [`FlakyStore`] are small stores for exercising the
//! coordinator without a real backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::error::LockError;
use crate::key::LockKey;
use crate::store::LockStore;
use crate::token::LockToken;

fn test_key(id: &str) -> LockKey {
    LockKey::new("conformance", id).expect("test keys are non-empty")
}

fn token(id: &str) -> LockToken {
    LockToken::new(id)
}

/// Run the lock store conformance test suite.
///
/// `clock` is used to wait out lock expirations, so it must be the clock the
/// store itself expires records by (the tokio clock for network backends).
///
/// # Errors
///
/// Returns an error if the store fails a call. Contract violations panic.
pub async fn run_store_conformance_tests(
    store: &dyn LockStore,
    clock: &dyn Clock,
) -> Result<(), LockError> {
    test_acquire_fresh_key(store).await?;
    test_contention(store).await?;
    test_reacquire_with_same_token(store).await?;
    test_release_requires_matching_token(store).await?;
    test_release_is_idempotent(store).await?;
    test_stores_are_isolated(store).await?;
    test_expired_record_is_reclaimed(store, clock).await?;
    Ok(())
}

/// Run the renewal conformance tests, for stores that implement
/// [`LockStore::refresh`].
pub async fn run_refresh_conformance_tests(
    store: &dyn LockStore,
    clock: &dyn Clock,
) -> Result<(), LockError> {
    test_refresh_by_owner(store, clock).await?;
    test_refresh_by_stranger(store).await?;
    Ok(())
}

async fn test_acquire_fresh_key(store: &dyn LockStore) -> Result<(), LockError> {
    let key = test_key("fresh");
    let acquired = store
        .try_acquire(&key, &token("t1"), Duration::from_secs(10))
        .await?;
    assert!(acquired, "acquire on a fresh key should succeed");
    assert!(store.release(&key, &token("t1")).await?);
    Ok(())
}

async fn test_contention(store: &dyn LockStore) -> Result<(), LockError> {
    let key = test_key("contended");
    assert!(
        store
            .try_acquire(&key, &token("t1"), Duration::from_secs(10))
            .await?
    );
    let second = store
        .try_acquire(&key, &token("t2"), Duration::from_secs(10))
        .await?;
    assert!(!second, "second acquire should fail while the lock is live");

    store.release(&key, &token("t1")).await?;
    Ok(())
}

async fn test_reacquire_with_same_token(store: &dyn LockStore) -> Result<(), LockError> {
    let key = test_key("same-token");
    assert!(
        store
            .try_acquire(&key, &token("t1"), Duration::from_secs(10))
            .await?
    );
    let again = store
        .try_acquire(&key, &token("t1"), Duration::from_secs(10))
        .await?;
    assert!(!again, "a live record blocks even its own token");

    store.release(&key, &token("t1")).await?;
    Ok(())
}

async fn test_release_requires_matching_token(store: &dyn LockStore) -> Result<(), LockError> {
    let key = test_key("ownership");
    assert!(
        store
            .try_acquire(&key, &token("owner"), Duration::from_secs(10))
            .await?
    );

    let stolen = store.release(&key, &token("intruder")).await?;
    assert!(!stolen, "release with a foreign token should fail");

    let still_held = !store
        .try_acquire(&key, &token("t3"), Duration::from_secs(10))
        .await?;
    assert!(still_held, "foreign release must not delete the record");

    assert!(store.release(&key, &token("owner")).await?);
    Ok(())
}

async fn test_release_is_idempotent(store: &dyn LockStore) -> Result<(), LockError> {
    let key = test_key("idempotent");
    assert!(
        store
            .try_acquire(&key, &token("t1"), Duration::from_secs(10))
            .await?
    );
    assert!(store.release(&key, &token("t1")).await?);
    assert!(
        !store.release(&key, &token("t1")).await?,
        "second release should report nothing deleted"
    );

    // A later holder is unaffected by a stale release.
    assert!(
        store
            .try_acquire(&key, &token("t2"), Duration::from_secs(10))
            .await?
    );
    assert!(!store.release(&key, &token("t1")).await?);
    assert!(store.release(&key, &token("t2")).await?);
    Ok(())
}

async fn test_stores_are_isolated(store: &dyn LockStore) -> Result<(), LockError> {
    let jobs = LockKey::new("conformance-jobs", "shared").expect("non-empty");
    let reports = LockKey::new("conformance-reports", "shared").expect("non-empty");

    assert!(
        store
            .try_acquire(&jobs, &token("t1"), Duration::from_secs(10))
            .await?
    );
    assert!(
        store
            .try_acquire(&reports, &token("t2"), Duration::from_secs(10))
            .await?,
        "the same key in another store should not contend"
    );

    store.release(&jobs, &token("t1")).await?;
    store.release(&reports, &token("t2")).await?;
    Ok(())
}

async fn test_expired_record_is_reclaimed(
    store: &dyn LockStore,
    clock: &dyn Clock,
) -> Result<(), LockError> {
    let key = test_key("expiring");
    assert!(
        store
            .try_acquire(&key, &token("t1"), Duration::from_millis(500))
            .await?
    );

    clock.sleep(Duration::from_millis(1100)).await;

    let reclaimed = store
        .try_acquire(&key, &token("t2"), Duration::from_secs(10))
        .await?;
    assert!(reclaimed, "an expired record should be reclaimable");
    assert!(
        !store.release(&key, &token("t1")).await?,
        "the expired holder must not release the new record"
    );
    assert!(store.release(&key, &token("t2")).await?);
    Ok(())
}

async fn test_refresh_by_owner(store: &dyn LockStore, clock: &dyn Clock) -> Result<(), LockError> {
    let key = test_key("refresh-owner");
    assert!(
        store
            .try_acquire(&key, &token("t1"), Duration::from_millis(800))
            .await?
    );
    assert!(
        store
            .refresh(&key, &token("t1"), Duration::from_secs(10))
            .await?
    );

    clock.sleep(Duration::from_millis(1200)).await;
    let blocked = !store
        .try_acquire(&key, &token("t2"), Duration::from_secs(10))
        .await?;
    assert!(blocked, "a refreshed lock should outlive its original TTL");

    store.release(&key, &token("t1")).await?;
    Ok(())
}

async fn test_refresh_by_stranger(store: &dyn LockStore) -> Result<(), LockError> {
    let key = test_key("refresh-stranger");
    assert!(
        store
            .try_acquire(&key, &token("t1"), Duration::from_secs(10))
            .await?
    );
    let refreshed = store
        .refresh(&key, &token("t2"), Duration::from_secs(60))
        .await?;
    assert!(!refreshed, "only the owner may refresh");

    store.release(&key, &token("t1")).await?;
    Ok(())
}

#[derive(Debug, Clone)]
struct Record {
    token: LockToken,
    expires_at: Instant,
}

/// Mutex-guarded store that expires records by a supplied [`Clock`] and
/// counts acquisition calls.
pub struct RecordingStore {
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<LockKey, Record>>,
    acquire_calls: AtomicU32,
}

impl RecordingStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: Mutex::new(HashMap::new()),
            acquire_calls: AtomicU32::new(0),
        }
    }

    /// Number of `try_acquire` calls received so far.
    pub fn acquire_calls(&self) -> u32 {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    /// Number of records that have not yet expired.
    pub fn live_records(&self) -> usize {
        let now = self.clock.now();
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|record| record.expires_at > now)
            .count()
    }
}

#[async_trait]
impl LockStore for RecordingStore {
    async fn try_acquire(
        &self,
        key: &LockKey,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now();
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.get(key).is_some_and(|record| record.expires_at > now) {
            return Ok(false);
        }
        records.insert(
            key.clone(),
            Record {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &LockKey, token: &LockToken) -> Result<bool, LockError> {
        let now = self.clock.now();
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let owned = records
            .get(key)
            .is_some_and(|record| &record.token == token && record.expires_at > now);
        if owned {
            records.remove(key);
        }
        Ok(owned)
    }

    async fn refresh(
        &self,
        key: &LockKey,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = self.clock.now();
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        match records.get_mut(key) {
            Some(record) if &record.token == token && record.expires_at > now => {
                record.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Wraps a store and fails its first `failures` calls with
/// [`LockError::StoreUnavailable`].
pub struct FlakyStore {
    inner: Arc<dyn LockStore>,
    remaining_failures: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn LockStore>, failures: u32) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(failures),
        }
    }

    fn fail_now(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LockStore for FlakyStore {
    async fn try_acquire(
        &self,
        key: &LockKey,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        if self.fail_now() {
            return Err(LockError::StoreUnavailable("injected outage".into()));
        }
        self.inner.try_acquire(key, token, ttl).await
    }

    async fn release(&self, key: &LockKey, token: &LockToken) -> Result<bool, LockError> {
        if self.fail_now() {
            return Err(LockError::StoreUnavailable("injected outage".into()));
        }
        self.inner.release(key, token).await
    }

    async fn refresh(
        &self,
        key: &LockKey,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        if self.fail_now() {
            return Err(LockError::StoreUnavailable("injected outage".into()));
        }
        self.inner.refresh(key, token, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn recording_store_conformance() {
        let clock = Arc::new(ManualClock::new());
        let store = RecordingStore::new(clock.clone());
        run_store_conformance_tests(&store, clock.as_ref())
            .await
            .expect("conformance tests should pass");
        run_refresh_conformance_tests(&store, clock.as_ref())
            .await
            .expect("refresh conformance tests should pass");
    }

    #[tokio::test]
    async fn flaky_store_recovers_after_budget() {
        let clock = Arc::new(ManualClock::new());
        let store = FlakyStore::new(Arc::new(RecordingStore::new(clock)), 2);
        let key = test_key("flaky");
        for _ in 0..2 {
            let err = store
                .try_acquire(&key, &token("t1"), Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(err.is_transient());
        }
        assert!(
            store
                .try_acquire(&key, &token("t1"), Duration::from_secs(1))
                .await
                .unwrap()
        );
    }
}
