//! Test Handler: a worker pool that consumes Tasks from the test queue,
//! fans out one sandbox per test, and publishes per-test and per-task
//! completion messages to the bus.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::Bus;
use crate::config::{COMPLETED_TASKS_CHANNEL, COMPLETED_TESTS_CHANNEL, RUNNER_IMAGE, RunnerPaths};
use crate::files::FilesManager;
use crate::model::{Task, TaskState, Test, TestResult, outputs_match, parse_tests_blob};
use crate::sandbox::{SandboxCtx, SandboxManager};

/// Runs `worker_count` concurrent workers draining `rx`. Returns once `rx`
/// closes and every worker has drained.
pub async fn run(
    worker_count: usize,
    rx: mpsc::Receiver<Task>,
    sandboxes: Arc<dyn SandboxManager>,
    files: Arc<dyn FilesManager>,
    bus: Arc<dyn Bus>,
    cancel: CancellationToken,
) {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let mut workers = Vec::new();
    for worker_id in 0..worker_count.max(1) {
        let rx = rx.clone();
        let sandboxes = sandboxes.clone();
        let files = files.clone();
        let bus = bus.clone();
        let cancel = cancel.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let task = { rx.lock().await.recv().await };
                let Some(task) = task else { break };
                test_one(worker_id, task, &sandboxes, &files, &bus, &cancel).await;
            }
        }));
    }
    for worker in workers {
        let _ = worker.await;
    }
}

async fn test_one(
    worker_id: usize,
    mut task: Task,
    sandboxes: &Arc<dyn SandboxManager>,
    files: &Arc<dyn FilesManager>,
    bus: &Arc<dyn Bus>,
    cancel: &CancellationToken,
) {
    info!(worker = worker_id, task_id = %task.id, "testing task");

    let Some(executable_location) = task.executable_location.clone() else {
        error!(task_id = %task.id, "task has no executable location, dropping");
        return;
    };
    let executable = match files.load(&executable_location.bucket, &executable_location.object).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(task_id = %task.id, error = %err, "failed to load executable, dropping task");
            return;
        }
    };
    let tests_blob = match files.load(&task.tests_location.bucket, &task.tests_location.object).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(task_id = %task.id, error = %err, "failed to load tests blob, dropping task");
            return;
        }
    };
    let tests = match parse_tests_blob(&tests_blob) {
        Ok(tests) => tests,
        Err(err) => {
            error!(task_id = %task.id, error = %err, "failed to parse tests blob, dropping task");
            return;
        }
    };

    let (results_tx, mut results_rx) = mpsc::channel::<TestResult>(tests.len().max(1));
    let executable = Arc::new(executable);
    for (test_id, test) in tests.into_iter().enumerate() {
        let task_id = task.id.clone();
        let sandboxes = sandboxes.clone();
        let executable = executable.clone();
        let results_tx = results_tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = run_one_test(&sandboxes, &cancel, &task_id, test_id as u32, &executable, &test).await;
            let _ = results_tx.send(result).await;
        });
    }
    drop(results_tx);

    while let Some(result) = results_rx.recv().await {
        task.tests_results.push(result.clone());
        if let Err(err) = bus
            .publish(COMPLETED_TESTS_CHANNEL, serde_json::to_vec(&result).expect("TestResult always serializes"))
            .await
        {
            warn!(task_id = %task.id, error = %err, "failed to publish test result");
        }
    }

    if task.tests_results.is_empty() {
        debug!(task_id = %task.id, "no tests to run; publishing completion with an empty results set");
    }
    task.state = TaskState::Completed;
    if let Err(err) = bus
        .publish(
            COMPLETED_TASKS_CHANNEL,
            serde_json::to_vec(&task).expect("Task always serializes"),
        )
        .await
    {
        error!(task_id = %task.id, error = %err, "failed to publish task completion");
    }
}

/// Creates a fresh sandbox, copies the executable and this test's stdin in,
/// runs it, compares normalized output, and always removes the sandbox.
async fn run_one_test(
    sandboxes: &Arc<dyn SandboxManager>,
    cancel: &CancellationToken,
    task_id: &str,
    test_id: u32,
    executable: &[u8],
    test: &Test,
) -> TestResult {
    let ctx = SandboxCtx::new(cancel.clone());
    let outcome = run_one_test_inner(&ctx, sandboxes, executable, test).await;

    match outcome {
        Ok(successful) => {
            debug!(task_id, test_id, successful, "test sandbox run completed");
            TestResult {
                task_id: task_id.to_string(),
                test_id,
                successful,
            }
        }
        Err(err) => {
            error!(task_id, test_id, error = %err, "test sandbox run failed");
            TestResult {
                task_id: task_id.to_string(),
                test_id,
                successful: false,
            }
        }
    }
}

async fn run_one_test_inner(
    ctx: &SandboxCtx,
    sandboxes: &Arc<dyn SandboxManager>,
    executable: &[u8],
    test: &Test,
) -> anyhow::Result<bool> {
    let sandbox_id = sandboxes.create(ctx, RUNNER_IMAGE, RunnerPaths::run_cmd()).await?;

    let result: anyhow::Result<bool> = async {
        sandboxes
            .copy_file_in(ctx, &sandbox_id, RunnerPaths::exec_path(), 0o700, executable.to_vec())
            .await?;
        sandboxes
            .copy_file_in(ctx, &sandbox_id, RunnerPaths::input_path(), 0o644, test.stdin.clone().into_bytes())
            .await?;
        sandboxes.start(ctx, &sandbox_id).await?;
        let status = sandboxes.wait(ctx, &sandbox_id).await?;
        let logs = sandboxes.read_logs(ctx, &sandbox_id).await?;
        Ok(status == 0 && outputs_match(&logs, &test.stdout))
    }
    .await;

    if let Err(err) = sandboxes.remove(ctx, &sandbox_id).await {
        warn!(error = %err, "failed to remove per-test sandbox");
    }
    result
}
