// Subcommand implementations

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use tokio::process::Command;
use tracing::{info, warn};

use keylease_core::{Context, LockError, LockHandle, LockScope};
use keylease_store::{LockStore, RedisStore};

use crate::config::AppConfig;
use crate::startup::shutdown;

/// Upper bound for one-shot administrative commands
const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Conventional shell status for a process stopped by SIGINT
const EXIT_INTERRUPTED: u8 = 130;

pub async fn connect(app: &AppConfig) -> anyhow::Result<Arc<dyn LockStore>> {
    let store = RedisStore::connect(&app.redis)
        .await
        .context("failed to connect to the lock store")?;
    Ok(Arc::new(store))
}

async fn open_handle(
    store: Arc<dyn LockStore>,
    app: &AppConfig,
    key: String,
    token: Option<String>,
) -> anyhow::Result<LockHandle> {
    let token = token.unwrap_or_else(LockHandle::generate_token);
    let handle = LockHandle::with_options(store, key, token, app.lock.clone()).await?;
    Ok(handle)
}

pub async fn health(
    store: Arc<dyn LockStore>,
    app: &AppConfig,
    key: String,
    token: Option<String>,
) -> anyhow::Result<ExitCode> {
    let handle = open_handle(store, app, key, token).await?;
    let ctx = Context::background().with_timeout(ADMIN_TIMEOUT);

    let health = handle.health_check(&ctx).await?;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(ExitCode::SUCCESS)
}

pub async fn force_unlock(
    store: Arc<dyn LockStore>,
    app: &AppConfig,
    key: String,
) -> anyhow::Result<ExitCode> {
    let handle = open_handle(store, app, key, None).await?;
    let ctx = Context::background().with_timeout(ADMIN_TIMEOUT);

    handle.force_unlock(&ctx).await?;
    info!(key = %handle.key(), "Lock deleted");
    Ok(ExitCode::SUCCESS)
}

pub async fn cleanup(
    store: Arc<dyn LockStore>,
    app: &AppConfig,
    key: String,
    token: String,
) -> anyhow::Result<ExitCode> {
    let handle = open_handle(store, app, key, Some(token)).await?;
    let ctx = Context::background().with_timeout(ADMIN_TIMEOUT);

    match handle.cleanup(&ctx).await {
        Ok(()) => {
            info!(key = %handle.key(), "Lock cleaned up");
            Ok(ExitCode::SUCCESS)
        }
        Err(LockError::LockNotHeld) => {
            bail!("lock {} is held by another owner, leaving it in place", handle.key())
        }
        Err(e) => Err(e.into()),
    }
}

/// Hold the lock for the lifetime of a child process
///
/// The lease is renewed in the background; losing it (or a shutdown signal)
/// kills the child and fails the command.
pub async fn run(
    store: Arc<dyn LockStore>,
    app: &AppConfig,
    key: String,
    token: Option<String>,
    wait_ms: u64,
    command: Vec<String>,
) -> anyhow::Result<ExitCode> {
    let Some((program, args)) = command.split_first() else {
        bail!("no command given");
    };

    let handle = Arc::new(open_handle(store, app, key, token).await?);
    let (ctx, canceller) = Context::background().with_cancel();
    shutdown::cancel_on_signal(canceller.clone());

    let mut scope = LockScope::new(handle.clone(), ctx.clone());
    if wait_ms > 0 {
        scope = scope.with_wait(Duration::from_millis(wait_ms));
    }
    let refresh_interval = app.lock.refresh_interval();

    let result = scope
        .run(|| async move {
            let mut child = Command::new(program)
                .args(args)
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("failed to start {}", program))?;
            info!(key = %handle.key(), program = %program, pid = ?child.id(), "Running under lock");

            let (mut lost, stopper) = handle.auto_refresh(&ctx, refresh_interval);

            let outcome: anyhow::Result<ExitCode> = tokio::select! {
                status = child.wait() => {
                    stopper.stop();
                    let status = status.context("failed to wait for child process")?;
                    info!(key = %handle.key(), status = %status, "Command finished");
                    Ok(exit_code(status.code()))
                }
                Ok(err) = &mut lost => {
                    warn!(key = %handle.key(), error = %err, "Lease lost, stopping command");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill child process");
                    }
                    Err(anyhow::Error::new(err).context("lock lost while command was running"))
                }
            };
            outcome
        })
        .await;

    match result {
        Err(e) if canceller.is_cancelled() => {
            info!(error = %format!("{:#}", e), "Interrupted");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
        other => other,
    }
}

fn exit_code(code: Option<i32>) -> ExitCode {
    match code {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        // Terminated by a signal
        None => ExitCode::FAILURE,
    }
}
