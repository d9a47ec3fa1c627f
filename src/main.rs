//! coderunner - distributed code-execution judge.

use std::sync::Arc;

use anyhow::{Context, Result};
use bollard::Docker;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use coderunner::bus::RedisBus;
use coderunner::config::{Config, SandboxStrategy, TASK_CHANNEL};
use coderunner::files::S3Files;
use coderunner::sandbox::SandboxManager;
use coderunner::sandbox::direct::DirectManager;
use coderunner::sandbox::limit::LimitManager;
use coderunner::sandbox::retry::RetryManager;
use coderunner::sandbox::tmpfs::TmpfsExecManager;
use coderunner::{Task, compile, ingress, test_handler};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(strategy = ?config.strategy, "starting coderunner");

    let docker = Docker::connect_with_local_defaults().context("failed to connect to docker")?;
    let sandboxes = build_sandbox_manager(docker, &config);

    let files = Arc::new(S3Files::new(&config).await);
    let bus = Arc::new(
        RedisBus::connect(&config.redis_url())
            .await
            .context("failed to connect to the bus")?,
    );
    let submissions = RedisBus::subscribe(&config.redis_url(), TASK_CHANNEL)
        .await
        .context("failed to subscribe to the task channel")?;

    let cancel = CancellationToken::new();

    let (compile_tx, compile_rx) = mpsc::channel::<Task>(config.compile_queue_capacity);
    let (test_tx, test_rx) = mpsc::channel::<Task>(config.test_queue_capacity);

    let ingress_handle = {
        let bus = bus.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = ingress::run(submissions, bus.as_ref(), compile_tx) => {}
                _ = cancel.cancelled() => {}
            }
        })
    };

    let compile_handle = tokio::spawn(compile::run(
        config.compile_workers,
        compile_rx,
        test_tx,
        sandboxes.clone(),
        files.clone(),
        bus.clone(),
        cancel.clone(),
    ));

    let test_handle = tokio::spawn(test_handler::run(
        config.test_workers,
        test_rx,
        sandboxes,
        files,
        bus,
        cancel.clone(),
    ));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received, draining in-flight work");
    cancel.cancel();

    let _ = ingress_handle.await;
    let _ = compile_handle.await;
    let _ = test_handle.await;

    Ok(())
}

/// Builds the configured sandbox-manager strategy wrapped in the retry and
/// concurrency-limit decorators, in that order (retry closest to the
/// strategy, so a retried attempt still counts against the concurrency cap).
fn build_sandbox_manager(docker: Docker, config: &Config) -> Arc<dyn SandboxManager> {
    let retry_delay = std::time::Duration::from_millis(config.sandbox_retry_delay_ms);
    match config.strategy {
        SandboxStrategy::Direct => {
            let base = Arc::new(DirectManager::new(docker));
            let retried = Arc::new(RetryManager::new(base, config.sandbox_retry_attempts, retry_delay));
            Arc::new(LimitManager::new(retried, config.sandbox_concurrency_limit))
        }
        SandboxStrategy::TmpfsExec => {
            let base = Arc::new(TmpfsExecManager::new(docker));
            let retried = Arc::new(RetryManager::new(base, config.sandbox_retry_attempts, retry_delay));
            Arc::new(LimitManager::new(retried, config.sandbox_concurrency_limit))
        }
    }
}
