use std::time::Duration;

use thiserror::Error;

/// Errors from lock store and coordinator operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// The backing store could not be reached or rejected the call.
    ///
    /// Retried within the deadline during acquisition, always surfaced on
    /// release.
    #[error("lock store unavailable: {0}")]
    StoreUnavailable(String),

    /// The acquisition deadline passed without obtaining the lock.
    #[error("timed out after {timeout:?} acquiring lock {key} ({attempts} attempts)")]
    AcquisitionTimeout {
        key: String,
        timeout: Duration,
        attempts: u32,
        /// The last store failure observed before the deadline, if any.
        #[source]
        last_error: Option<Box<LockError>>,
    },

    /// The lock was no longer held by the releasing token: it expired or was
    /// taken over by a later acquirer.
    #[error("lock {0} was already released or taken over")]
    AlreadyReleased(String),

    #[error("invalid lock configuration: {0}")]
    InvalidConfiguration(String),

    /// Acquisition was aborted through its cancellation token.
    #[error("acquisition of lock {0} was cancelled")]
    Cancelled(String),
}

impl LockError {
    /// Whether the failure may clear up on its own and is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
