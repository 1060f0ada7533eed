use std::process::ExitStatus;
use std::time::Duration;

use anyhow::anyhow;
use clap::Args;
use serde::Serialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tollgate_lock::{LockCoordinator, LockHandle, LockOptions, LockRequest};
use tracing::{info, warn};

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Lock identifier; the configured prefix is prepended.
    #[arg(long)]
    pub key: String,
    /// Override the acquisition timeout, in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Keep extending the lock while the command runs.
    #[arg(long)]
    pub renew: bool,
    /// Command to run while the lock is held.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RunOutput {
    key: String,
    exit_code: Option<i32>,
    success: bool,
}

pub async fn run(
    coordinator: &LockCoordinator,
    options: &LockOptions,
    args: &RunArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let mut request = options.request(&args.key)?.manually_released(false);
    if let Some(ms) = args.timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }

    // Ctrl-C only aborts a pending acquisition; once the command runs it
    // receives the signal itself and the lock is released when it exits.
    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    let status = run_under_lock(coordinator, &request, &args.command, args.renew, &cancel).await?;

    let output = RunOutput {
        key: request.key.canonical(),
        exit_code: status.code(),
        success: status.success(),
    };
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            if !output.success {
                eprintln!("Command exited with {status} while holding {}.", output.key);
            }
        }
    }

    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}

/// Run `command` while holding the lock described by `request`.
pub async fn run_under_lock(
    coordinator: &LockCoordinator,
    request: &LockRequest,
    command: &[String],
    renew: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<ExitStatus> {
    let (program, rest) = command
        .split_first()
        .ok_or_else(|| anyhow!("no command given"))?;
    let ttl = request.expiration;

    let status = coordinator
        .with_lock_until_cancelled(request, cancel, |handle| async move {
            info!(lock.key = %handle.key(), command = %program, "running command under lock");
            let child = Command::new(program).args(rest).spawn()?;
            if renew {
                wait_renewing(coordinator, handle, ttl, child).await
            } else {
                wait(child).await
            }
        })
        .await??;
    Ok(status)
}

async fn wait(mut child: tokio::process::Child) -> std::io::Result<ExitStatus> {
    child.wait().await
}

async fn wait_renewing(
    coordinator: &LockCoordinator,
    mut handle: LockHandle,
    ttl: Duration,
    mut child: tokio::process::Child,
) -> std::io::Result<ExitStatus> {
    let period = (ttl / 2).max(Duration::from_millis(1));
    loop {
        tokio::select! {
            status = child.wait() => return status,
            () = tokio::time::sleep(period) => {
                match coordinator.refresh(&mut handle, ttl).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(lock.key = %handle.key(), "lock lost while command is running");
                    }
                    Err(e) => {
                        warn!(lock.key = %handle.key(), error = %e, "failed to renew lock");
                    }
                }
            }
        }
    }
}
