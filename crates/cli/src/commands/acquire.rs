use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use tollgate_lock::{LockCoordinator, LockOptions};

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct AcquireArgs {
    /// Lock identifier; the configured prefix is prepended.
    #[arg(long)]
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct AcquireOutput {
    pub store_id: String,
    pub key: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn run(
    coordinator: &LockCoordinator,
    options: &LockOptions,
    args: &AcquireArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let output = acquire(coordinator, options, &args.key).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("{}", output.token);
            eprintln!(
                "Holding {}/{} until {}.",
                output.store_id,
                output.key,
                output.expires_at.to_rfc3339()
            );
        }
    }
    Ok(())
}

/// Take the lock for `key` without scheduling its release.
pub async fn acquire(
    coordinator: &LockCoordinator,
    options: &LockOptions,
    key: &str,
) -> anyhow::Result<AcquireOutput> {
    let request = options.request(key)?.manually_released(true);
    let handle = coordinator.acquire(&request).await?;

    let remaining = handle.remaining(coordinator.clock().now());
    let expires_at = Utc::now() + chrono::Duration::from_std(remaining)?;

    Ok(AcquireOutput {
        store_id: handle.store_id().to_owned(),
        key: handle.key().key().to_owned(),
        token: handle.token().as_str().to_owned(),
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tollgate_lock::LockError;
    use tollgate_lock_memory::MemoryLockStore;

    use super::*;

    #[tokio::test]
    async fn lock_stays_held_after_acquire() {
        let store = Arc::new(MemoryLockStore::new());
        let coordinator = LockCoordinator::new(store.clone());
        let options = LockOptions::default();

        let output = acquire(&coordinator, &options, "nightly").await.unwrap();
        assert_eq!(output.store_id, "lock");
        assert_eq!(output.key, "lock:nightly");
        assert!(!output.token.is_empty());
        assert!(output.expires_at > Utc::now());
        assert_eq!(store.len(), 1);

        let quick = LockOptions {
            timeout: tollgate_lock::Interval::seconds(0),
            ..LockOptions::default()
        };
        let err = acquire(&coordinator, &quick, "nightly").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LockError>(),
            Some(LockError::AcquisitionTimeout { .. })
        ));
    }
}
