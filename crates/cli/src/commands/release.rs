use clap::Args;
use serde::Serialize;
use tollgate_lock::{LockCoordinator, LockHandle, LockOptions, LockToken};

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct ReleaseArgs {
    /// Lock identifier; the configured prefix is prepended.
    #[arg(long)]
    pub key: String,
    /// Token printed by `tollgate acquire`.
    #[arg(long, env = "TOLLGATE_TOKEN")]
    pub token: String,
}

#[derive(Debug, Serialize)]
struct ReleaseOutput {
    key: String,
    released: bool,
}

pub async fn run(
    coordinator: &LockCoordinator,
    options: &LockOptions,
    args: &ReleaseArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let released = release(coordinator, options, &args.key, &args.token).await?;
    let output = ReleaseOutput {
        key: options.key_for(&args.key)?.canonical(),
        released,
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            if released {
                println!("Released {}.", output.key);
            } else {
                eprintln!(
                    "Lock {} was not held by this token (expired or taken over).",
                    output.key
                );
            }
        }
    }

    if !released {
        std::process::exit(1);
    }
    Ok(())
}

/// Release the lock for `key` if `token` still owns it.
pub async fn release(
    coordinator: &LockCoordinator,
    options: &LockOptions,
    key: &str,
    token: &str,
) -> anyhow::Result<bool> {
    let handle = handle_for(options, key, token, coordinator.clock().now())?;
    Ok(coordinator.release(&handle).await?)
}

/// The expiry of a lock taken by another process is not known here.
fn handle_for(
    options: &LockOptions,
    key: &str,
    token: &str,
    now: tokio::time::Instant,
) -> anyhow::Result<LockHandle> {
    Ok(LockHandle::from_token(
        options.key_for(key)?,
        LockToken::new(token),
        now,
        true,
    ))
}
