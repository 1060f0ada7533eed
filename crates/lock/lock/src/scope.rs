//! Running an operation while holding a lock.
//!
//! [`LockCoordinator::with_lock`] is the explicit counterpart of wrapping a
//! function in a lock: acquire, run, release. [`LockedCall`] packages the
//! coordinator, the caller's [`LockOptions`] and a [`KeyResolver`] so the same
//! wrapper can be applied to many calls.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::coordinator::LockCoordinator;
use crate::error::LockError;
use crate::handle::LockHandle;
use crate::key::KeyResolver;
use crate::options::{LockOptions, LockRequest};

impl LockCoordinator {
    /// Acquire the lock, run `op`, and release the lock afterwards.
    ///
    /// With automatic release the lock is released on every exit path of
    /// `op`, including a panic (which is resumed after releasing). If the
    /// returned future is dropped mid-flight, no release happens and the
    /// lock lapses at its expiration.
    ///
    /// With `manually_released` set on the request, `op` receives the handle
    /// and the lock stays held when it returns.
    ///
    /// # Errors
    ///
    /// Acquisition errors are returned without running `op`. A store failure
    /// while releasing replaces `op`'s result, since the lock may still be
    /// held. Losing the lock before release is only logged.
    pub async fn with_lock<F, Fut, T>(&self, request: &LockRequest, op: F) -> Result<T, LockError>
    where
        F: FnOnce(LockHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        self.with_lock_until_cancelled(request, &CancellationToken::new(), op)
            .await
    }

    /// [`with_lock`](Self::with_lock) whose acquisition aborts when `cancel`
    /// fires. Cancellation does not interrupt `op` once it has started.
    pub async fn with_lock_until_cancelled<F, Fut, T>(
        &self,
        request: &LockRequest,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce(LockHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.acquire_until_cancelled(request, cancel).await?;
        if handle.is_manually_released() {
            return Ok(op(handle).await);
        }

        let outcome = AssertUnwindSafe(op(handle.clone())).catch_unwind().await;
        let released = self.release(&handle).await;

        match outcome {
            Ok(value) => {
                released?;
                Ok(value)
            }
            Err(panic) => {
                if let Err(e) = released {
                    error!(lock.key = %handle.key(), error = %e, "failed to release lock after panic");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

/// A reusable lock wrapper: resolves a key from each call's arguments and
/// runs the call under [`LockCoordinator::with_lock`].
///
/// ```no_run
/// # async fn demo(coordinator: tollgate_lock::LockCoordinator) -> Result<(), tollgate_lock::LockError> {
/// use tollgate_lock::{LockOptions, LockedCall};
///
/// let call = LockedCall::new(coordinator, LockOptions::default(), |job: &u64| format!("job:{job}"));
/// let report = call.call(&42_u64, |_handle| async { "done" }).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LockedCall<R> {
    coordinator: LockCoordinator,
    options: LockOptions,
    resolver: R,
    shutdown: CancellationToken,
}

impl<R> LockedCall<R> {
    pub fn new(coordinator: LockCoordinator, options: LockOptions, resolver: R) -> Self {
        Self {
            coordinator,
            options,
            resolver,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort pending acquisitions when `shutdown` fires.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Run `op` under the lock resolved from `args`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidConfiguration`] if the resolver yields an
    /// empty key or the options are invalid, and otherwise the errors of
    /// [`LockCoordinator::with_lock`].
    pub async fn call<A, F, Fut, T>(&self, args: &A, op: F) -> Result<T, LockError>
    where
        A: ?Sized,
        R: KeyResolver<A>,
        F: FnOnce(LockHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        let request = self.options.request(&self.resolver.resolve(args))?;
        self.coordinator
            .with_lock_until_cancelled(&request, &self.shutdown, op)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::key::{FixedKey, LockKey};
    use crate::testing::RecordingStore;

    fn setup() -> (LockCoordinator, Arc<RecordingStore>) {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(RecordingStore::new(clock.clone()));
        (LockCoordinator::new(store.clone()).with_clock(clock), store)
    }

    fn request(manual: bool) -> LockRequest {
        LockRequest::new(LockKey::new("lock", "report").unwrap()).manually_released(manual)
    }

    #[tokio::test]
    async fn releases_after_success() {
        let (coordinator, store) = setup();
        let value = coordinator
            .with_lock(&request(false), |handle| async move {
                assert_eq!(handle.key().key(), "report");
                7
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(store.live_records(), 0);
    }

    #[tokio::test]
    async fn releases_after_operation_error() {
        let (coordinator, store) = setup();
        let result: Result<Result<(), &str>, _> = coordinator
            .with_lock(&request(false), |_| async { Err("boom") })
            .await;
        assert_eq!(result.unwrap(), Err("boom"));
        assert_eq!(store.live_records(), 0);
    }

    async fn explode() -> u32 {
        panic!("operation exploded")
    }

    #[tokio::test]
    async fn releases_after_panic() {
        let (coordinator, store) = setup();
        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .with_lock(&request(false), |_| explode())
                    .await
            })
        };
        let joined = task.await;
        assert!(joined.unwrap_err().is_panic());
        assert_eq!(store.live_records(), 0);
    }

    #[tokio::test]
    async fn manual_release_keeps_lock() {
        let (coordinator, store) = setup();
        let handle = coordinator
            .with_lock(&request(true), |handle| async move { handle })
            .await
            .unwrap();
        assert!(handle.is_manually_released());
        assert_eq!(store.live_records(), 1);

        assert!(coordinator.release(&handle).await.unwrap());
        assert_eq!(store.live_records(), 0);
    }

    #[tokio::test]
    async fn contended_lock_skips_operation() {
        let (coordinator, _store) = setup();
        let _held = coordinator.acquire(&request(false)).await.unwrap();

        let ran = AtomicBool::new(false);
        let result = coordinator
            .with_lock(&request(false).with_timeout(Duration::ZERO), |_| async {
                ran.store(true, Ordering::SeqCst);
            })
            .await;
        assert!(matches!(result, Err(LockError::AcquisitionTimeout { .. })));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn locked_call_resolves_key_from_arguments() {
        let (coordinator, store) = setup();
        let call = LockedCall::new(coordinator, LockOptions::default(), |job: &u64| {
            format!("job:{job}")
        });

        let seen = call
            .call(&42_u64, |handle| async move { handle.key().clone() })
            .await
            .unwrap();
        assert_eq!(seen.store_id(), "lock");
        assert_eq!(seen.key(), "lock:job:42");
        assert_eq!(store.live_records(), 0);
    }

    #[tokio::test]
    async fn locked_call_rejects_empty_resolution() {
        let (coordinator, store) = setup();
        let call = LockedCall::new(coordinator, LockOptions::default(), FixedKey(String::new()));
        let result = call.call(&(), |_| async {}).await;
        assert!(matches!(result, Err(LockError::InvalidConfiguration(_))));
        assert_eq!(store.acquire_calls(), 0);
    }

    #[tokio::test]
    async fn locked_call_honors_shutdown() {
        let (coordinator, _store) = setup();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let call = LockedCall::new(coordinator, LockOptions::default(), FixedKey("nightly".into()))
            .with_shutdown(shutdown);
        let result = call.call(&(), |_| async {}).await;
        assert!(matches!(result, Err(LockError::Cancelled(_))));
    }
}
