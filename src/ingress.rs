//! Ingress Loop: subscribes to the task-submission channel, persists each
//! newborn Task under its kv key, and forwards it to the compile queue.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::bus::Bus;
use crate::model::{StartTaskCommand, Task};

/// Consumes `submissions` (already-subscribed bus payloads) until the stream
/// ends, parsing each as a [`StartTaskCommand`]. Malformed payloads are
/// logged and skipped. Valid commands are persisted to the kv store and
/// blocked-sent to `compile_tx` — the bounded compile queue is the natural
/// backpressure point.
pub async fn run(
    mut submissions: impl Stream<Item = Vec<u8>> + Unpin,
    bus: &dyn Bus,
    compile_tx: mpsc::Sender<Task>,
) {
    while let Some(payload) = submissions.next().await {
        let command: StartTaskCommand = match serde_json::from_slice(&payload) {
            Ok(command) => command,
            Err(err) => {
                warn!(error = %err, "malformed StartTaskCommand payload, skipping");
                continue;
            }
        };

        let task = Task::from_command(command);
        info!(task_id = %task.id, "accepted submission");

        let record = serde_json::to_vec(&task).expect("Task always serializes");
        if let Err(err) = bus.set(&Task::kv_key(&task.id), record).await {
            warn!(task_id = %task.id, error = %err, "failed to persist initial task record");
        }

        if compile_tx.send(task).await.is_err() {
            warn!("compile queue closed; stopping ingress loop");
            break;
        }
    }
}
