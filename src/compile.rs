//! Compile Handler: a worker pool that consumes Tasks from the bounded
//! compile queue, compiles the submitted source in a sandbox, and forwards
//! the Task to the test stage on success.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::Bus;
use crate::config::{COMPLETED_TASKS_CHANNEL, CompilePaths, EXECUTABLES_BUCKET};
use crate::files::FilesManager;
use crate::model::{FileLocation, Task, TaskState};
use crate::sandbox::{SandboxCtx, SandboxManager};

const COMPILER_IMAGE: &str = "coderunner-compiler:latest";

/// Runs `worker_count` concurrent workers draining `rx`, forwarding each
/// successfully compiled Task to `test_tx`. Returns once `rx` closes and
/// every worker has drained.
pub async fn run(
    worker_count: usize,
    rx: mpsc::Receiver<Task>,
    test_tx: mpsc::Sender<Task>,
    sandboxes: Arc<dyn SandboxManager>,
    files: Arc<dyn FilesManager>,
    bus: Arc<dyn Bus>,
    cancel: CancellationToken,
) {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let mut workers = Vec::new();
    for worker_id in 0..worker_count.max(1) {
        let rx = rx.clone();
        let test_tx = test_tx.clone();
        let sandboxes = sandboxes.clone();
        let files = files.clone();
        let bus = bus.clone();
        let cancel = cancel.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let task = { rx.lock().await.recv().await };
                let Some(task) = task else { break };
                compile_one(worker_id, task, &test_tx, &sandboxes, &files, &bus, &cancel).await;
            }
        }));
    }
    for worker in workers {
        let _ = worker.await;
    }
}

async fn compile_one(
    worker_id: usize,
    mut task: Task,
    test_tx: &mpsc::Sender<Task>,
    sandboxes: &Arc<dyn SandboxManager>,
    files: &Arc<dyn FilesManager>,
    bus: &Arc<dyn Bus>,
    cancel: &CancellationToken,
) {
    let ctx = SandboxCtx::new(cancel.clone());
    info!(worker = worker_id, task_id = %task.id, "compiling task");

    let source = match files.load(&task.code_location.bucket, &task.code_location.object).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(task_id = %task.id, error = %err, "failed to load source, dropping task");
            return;
        }
    };

    let sandbox_id = match sandboxes
        .create(&ctx, COMPILER_IMAGE, CompilePaths::compile_cmd())
        .await
    {
        Ok(id) => id,
        Err(err) => {
            error!(task_id = %task.id, error = %err, "failed to create compile sandbox, dropping task");
            return;
        }
    };

    let outcome = compile_in_sandbox(&ctx, sandboxes, &sandbox_id, &source, &task).await;

    if let Err(err) = sandboxes.remove(&ctx, &sandbox_id).await {
        warn!(task_id = %task.id, error = %err, "failed to remove compile sandbox");
    }

    match outcome {
        Ok(CompileOutcome::Success(executable)) => {
            let object_name = format!("{}.out", task.id);
            if let Err(err) = files.put(EXECUTABLES_BUCKET, &object_name, executable).await {
                error!(task_id = %task.id, error = %err, "failed to store executable, dropping task");
                return;
            }
            task.executable_location = Some(FileLocation::new(EXECUTABLES_BUCKET, object_name));
            task.state = TaskState::Testing;
            // The kv `task:<id>` record is not rewritten here: the kv store
            // is write-once, written only by the ingress loop. The in-memory
            // Task (now in the `testing` state) is what actually carries
            // forward to the test stage.
            if test_tx.send(task).await.is_err() {
                error!("test queue closed; dropping compiled task");
            }
        }
        Ok(CompileOutcome::CompileFailed { logs }) => {
            // The kv `task:<id>` record stays in `compiling` state (the kv
            // store is write-once); only the bus snapshot below carries the
            // failure.
            task.state = TaskState::Completed;
            task.compile_failed = true;
            task.compile_logs = Some(logs);
            if let Err(err) = bus.publish(COMPLETED_TASKS_CHANNEL, serialize(&task)).await {
                error!(task_id = %task.id, error = %err, "failed to publish compile-failure task completion");
            }
        }
        Err(err) => {
            error!(task_id = %task.id, error = %err, "compile stage failed, dropping task");
        }
    }
}

enum CompileOutcome {
    Success(Vec<u8>),
    CompileFailed { logs: String },
}

/// Copies the source in, runs the compiler, and on success loads the
/// resulting executable back out. A non-zero compiler exit is a normal
/// outcome (`CompileOutcome::CompileFailed`), distinct from an `Err`, which
/// means a sandbox/runtime failure.
async fn compile_in_sandbox(
    ctx: &SandboxCtx,
    sandboxes: &Arc<dyn SandboxManager>,
    sandbox_id: &crate::sandbox::SandboxId,
    source: &[u8],
    task: &Task,
) -> anyhow::Result<CompileOutcome> {
    sandboxes
        .copy_file_in(ctx, sandbox_id, CompilePaths::src_path(), 0o644, source.to_vec())
        .await?;
    sandboxes.start(ctx, sandbox_id).await?;
    let status = sandboxes.wait(ctx, sandbox_id).await?;

    if status != 0 {
        let logs = sandboxes.read_logs(ctx, sandbox_id).await.unwrap_or_default();
        error!(task_id = %task.id, status, logs = %logs, "compile failed");
        return Ok(CompileOutcome::CompileFailed { logs });
    }

    let executable = sandboxes.load_file(ctx, sandbox_id, CompilePaths::exec_path()).await?;
    Ok(CompileOutcome::Success(executable))
}

fn serialize(task: &Task) -> Vec<u8> {
    serde_json::to_vec(task).expect("Task always serializes")
}
