use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, TokioClock};
use crate::error::LockError;
use crate::handle::LockHandle;
use crate::key::LockKey;
use crate::options::LockRequest;
use crate::store::LockStore;
use crate::token::{LockToken, TokenGenerator, UuidTokenGenerator};

/// Drives the acquire/release protocol against a [`LockStore`].
///
/// Mutual exclusion comes entirely from the store's atomic primitives; the
/// coordinator only paces retries, enforces deadlines, and hands out
/// [`LockHandle`]s. It holds no mutable state, so one instance (or any of its
/// clones) can serve many concurrent callers.
#[derive(Clone)]
pub struct LockCoordinator {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn TokenGenerator>,
}

impl std::fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator").finish_non_exhaustive()
    }
}

impl LockCoordinator {
    /// Create a coordinator using the tokio clock and UUID tokens.
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            clock: Arc::new(TokioClock),
            tokens: Arc::new(UuidTokenGenerator),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_token_generator(mut self, tokens: Arc<dyn TokenGenerator>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Acquire a lock, retrying until it is granted or the request's timeout
    /// elapses.
    ///
    /// # Errors
    ///
    /// - [`LockError::InvalidConfiguration`] if the request fails validation;
    ///   the store is not called.
    /// - [`LockError::AcquisitionTimeout`] once the deadline passes, carrying
    ///   the last store failure if there was one.
    pub async fn acquire(&self, request: &LockRequest) -> Result<LockHandle, LockError> {
        self.acquire_until_cancelled(request, &CancellationToken::new())
            .await
    }

    /// Like [`acquire`](Self::acquire), but aborts promptly with
    /// [`LockError::Cancelled`] when `cancel` fires, including in the middle
    /// of a retry pause.
    ///
    /// One ownership token is generated per call and reused across its
    /// attempts. Store failures are retried like contended attempts until the
    /// deadline; any other error ends the call immediately.
    #[instrument(
        skip(self, request, cancel),
        fields(lock.key = %request.key, timeout = ?request.timeout, attempts)
    )]
    pub async fn acquire_until_cancelled(
        &self,
        request: &LockRequest,
        cancel: &CancellationToken,
    ) -> Result<LockHandle, LockError> {
        request.validate()?;

        let key = &request.key;
        let started = self.clock.now();
        let deadline = checked_deadline(started, request.timeout, "timeout")?;
        checked_deadline(started, request.expiration, "expiration")?;

        let token = self.tokens.generate();
        let mut attempts: u32 = 0;
        let mut last_error: Option<LockError> = None;

        loop {
            if cancel.is_cancelled() {
                info!(lock.key = %key, attempts, "lock acquisition cancelled");
                return Err(LockError::Cancelled(key.canonical()));
            }

            attempts += 1;
            tracing::Span::current().record("attempts", attempts);
            let attempt_started = self.clock.now();
            // A single-shot request waits for its one attempt; otherwise the
            // attempt may not outlive the deadline.
            let budget = if request.timeout.is_zero() {
                None
            } else {
                Some(deadline.saturating_duration_since(attempt_started))
            };

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.abandon_attempt(key, &token);
                    info!(lock.key = %key, attempts, "lock acquisition cancelled");
                    return Err(LockError::Cancelled(key.canonical()));
                }
                result = self.store.try_acquire(key, &token, request.expiration) => result,
                () = self.clock.sleep(budget.unwrap_or_default()), if budget.is_some() => {
                    self.abandon_attempt(key, &token);
                    Err(LockError::StoreUnavailable(format!(
                        "acquire attempt did not complete within {:?}",
                        request.timeout
                    )))
                }
            };

            match outcome {
                Ok(true) => {
                    let expires_at =
                        checked_deadline(attempt_started, request.expiration, "expiration")?;
                    info!(lock.key = %key, attempts, "lock acquired");
                    return Ok(LockHandle::from_parts(
                        key.clone(),
                        token,
                        expires_at,
                        request.manually_released,
                    ));
                }
                Ok(false) => {
                    debug!(lock.key = %key, attempt = attempts, "lock is held elsewhere");
                }
                Err(err) if err.is_transient() => {
                    warn!(
                        lock.key = %key,
                        attempt = attempts,
                        error = %err,
                        "lock store unavailable, will retry"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }

            let now = self.clock.now();
            if now >= deadline {
                debug!(lock.key = %key, attempts, "lock acquisition timed out");
                return Err(LockError::AcquisitionTimeout {
                    key: key.canonical(),
                    timeout: request.timeout,
                    attempts,
                    last_error: last_error.map(Box::new),
                });
            }

            let pause = request
                .backoff
                .delay_for(request.retry, attempts - 1)
                .min(deadline - now);

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(lock.key = %key, attempts, "lock acquisition cancelled");
                    return Err(LockError::Cancelled(key.canonical()));
                }
                () = self.clock.sleep(pause) => {}
            }
        }
    }

    /// Best-effort cleanup after dropping an in-flight `try_acquire`: the
    /// write may still land, so release it in the background.
    fn abandon_attempt(&self, key: &LockKey, token: &LockToken) {
        let store = Arc::clone(&self.store);
        let key = key.clone();
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = store.release(&key, &token).await {
                debug!(lock.key = %key, error = %e, "cleanup of abandoned attempt failed");
            }
        });
    }

    /// Release a lock if this handle still owns it.
    ///
    /// Returns `false` when the lock had already expired or been taken over
    /// by a later acquirer. That is logged but not treated as an error, so
    /// releasing the same handle twice is safe.
    ///
    /// # Errors
    ///
    /// Store failures are always returned: the caller must not assume the
    /// lock is gone.
    #[instrument(skip(self, handle), fields(lock.key = %handle.key()))]
    pub async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        let released = self.store.release(handle.key(), handle.token()).await?;
        if released {
            info!(lock.key = %handle.key(), "lock released");
        } else {
            if handle.expiry_known() {
                warn!(
                    lock.key = %handle.key(),
                    expired = handle.is_expired(self.clock.now()),
                    "lock was already released or taken over"
                );
            } else {
                warn!(lock.key = %handle.key(), "lock was already released or taken over");
            }
        }
        Ok(released)
    }

    /// Release a lock, reporting a lost lock as [`LockError::AlreadyReleased`].
    ///
    /// For callers whose correctness depends on having held the lock until
    /// this point.
    pub async fn release_strict(&self, handle: &LockHandle) -> Result<(), LockError> {
        if self.release(handle).await? {
            Ok(())
        } else {
            Err(LockError::AlreadyReleased(handle.key().canonical()))
        }
    }

    /// Extend a held lock to expire `ttl` from now.
    ///
    /// Returns `false` if the lock is no longer held by this handle, or the
    /// store does not support renewal. The handle's deadline is only updated
    /// on success.
    #[instrument(skip(self, handle), fields(lock.key = %handle.key()))]
    pub async fn refresh(&self, handle: &mut LockHandle, ttl: Duration) -> Result<bool, LockError> {
        if ttl.is_zero() {
            return Err(LockError::InvalidConfiguration(format!(
                "refresh ttl for lock {} must be positive",
                handle.key()
            )));
        }
        let started = self.clock.now();
        let expires_at = checked_deadline(started, ttl, "refresh ttl")?;

        let refreshed = self
            .store
            .refresh(handle.key(), handle.token(), ttl)
            .await?;
        if refreshed {
            handle.set_expires_at(expires_at);
            debug!(lock.key = %handle.key(), ttl = ?ttl, "lock refreshed");
        } else {
            warn!(lock.key = %handle.key(), "lock could not be refreshed");
        }
        Ok(refreshed)
    }
}

fn checked_deadline(start: Instant, span: Duration, what: &str) -> Result<Instant, LockError> {
    start
        .checked_add(span)
        .ok_or_else(|| LockError::InvalidConfiguration(format!("{what} {span:?} is out of range")))
}
