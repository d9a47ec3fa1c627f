//! Strategy B: a long-lived idle container per sandbox, with tmpfs-backed
//! `/app` and `/tmp`; the real command runs as an exec inside it.
//!
//! Per-sandbox bookkeeping (the container id, the command to run, the
//! captured exec output, and the readiness signal) lives in a `Record` owned
//! by this manager and reached through a short-lived map lookup, so the map
//! lock is only ever held for the lookup itself and never across an await
//! point. `cmd` lives on the `Record` rather than as a single field on the
//! manager, so concurrent `create` calls for different sandboxes never
//! clobber each other's command.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, oneshot};

use super::{SandboxCtx, SandboxError, SandboxId, SandboxManager, SandboxResult, StatusCode};

const TMPFS_SIZE_BYTES: i64 = 64 * 1024 * 1024;

struct Record {
    container_id: String,
    cmd: Vec<String>,
    exec_id: Mutex<Option<String>>,
    output: Mutex<Option<Vec<u8>>>,
    ready_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

/// Tmpfs-exec strategy. `Create` provisions an idle container with
/// `/app`/`/tmp` as RAM-backed mounts; `Start` execs `cmd` inside it and
/// drains its output in the background.
pub struct TmpfsExecManager {
    docker: Docker,
    image_to_idle_cmd: Vec<String>,
    records: Mutex<HashMap<SandboxId, Arc<Record>>>,
}

impl TmpfsExecManager {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            image_to_idle_cmd: vec!["tail".into(), "-f".into(), "/dev/null".into()],
            records: Mutex::new(HashMap::new()),
        }
    }

    async fn record(&self, id: &SandboxId) -> SandboxResult<Arc<Record>> {
        self.records
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(id.clone()))
    }

    fn tmpfs_mount(target: &str) -> Mount {
        Mount {
            target: Some(target.to_string()),
            typ: Some(MountTypeEnum::TMPFS),
            tmpfs_size: Some(TMPFS_SIZE_BYTES),
            read_only: Some(false),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SandboxManager for TmpfsExecManager {
    async fn create(&self, _ctx: &SandboxCtx, image: &str, cmd: Vec<String>) -> SandboxResult<SandboxId> {
        let name = format!("coderunner-{}", uuid::Uuid::new_v4());
        let host_config = HostConfig {
            mounts: Some(vec![
                Self::tmpfs_mount("/app"),
                Self::tmpfs_mount("/tmp"),
            ]),
            ..Default::default()
        };
        let config = ContainerConfig {
            image: Some(image.to_string()),
            cmd: Some(self.image_to_idle_cmd.clone()),
            host_config: Some(host_config),
            // The runtime's own log channel stays off; output is read back
            // through exec attach instead.
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::CreateFailed(e.into()))?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::CreateFailed(e.into()))?;

        let id = SandboxId(name);
        self.records.lock().await.insert(
            id.clone(),
            Arc::new(Record {
                container_id: response.id,
                cmd,
                exec_id: Mutex::new(None),
                output: Mutex::new(None),
                ready_rx: Mutex::new(None),
            }),
        );
        Ok(id)
    }

    async fn copy_file_in(
        &self,
        _ctx: &SandboxCtx,
        id: &SandboxId,
        path: &str,
        mode: u32,
        data: Vec<u8>,
    ) -> SandboxResult<()> {
        let record = self.record(id).await?;
        let script = r#"mkdir -p "$(dirname "$1")" && cat > "$1" && chmod "$2" "$1""#;
        let cmd = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
            path.to_string(),
            format!("{mode:o}"),
        ];
        let (status, _) = run_exec(&self.docker, &record.container_id, cmd, Some(data))
            .await
            .map_err(SandboxError::CopyInFailed)?;
        if status != 0 {
            return Err(SandboxError::CopyInFailed(anyhow::anyhow!(
                "copy-in script exited {status}"
            )));
        }
        Ok(())
    }

    async fn start(&self, _ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<()> {
        let record = self.record(id).await?;
        let exec = self
            .docker
            .create_exec(
                &record.container_id,
                CreateExecOptions {
                    cmd: Some(record.cmd.clone()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::StartFailed(e.into()))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::StartFailed(e.into()))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        *record.exec_id.lock().await = Some(exec.id.clone());
        *record.ready_rx.lock().await = Some(ready_rx);

        let record = Arc::clone(&record);
        tokio::spawn(async move {
            let mut buf = Vec::new();
            if let StartExecResults::Attached { mut output, .. } = start_result {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                            buf.extend_from_slice(&message);
                        }
                        _ => {}
                    }
                }
            }
            *record.output.lock().await = Some(buf);
            let _ = ready_tx.send(());
        });

        Ok(())
    }

    async fn wait(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<StatusCode> {
        let record = self.record(id).await?;
        let exec_id = record
            .exec_id
            .lock()
            .await
            .clone()
            .ok_or_else(|| SandboxError::WaitFailed(anyhow::anyhow!("sandbox was never started")))?;

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(SandboxError::Canceled);
            }
            let inspect = self
                .docker
                .inspect_exec(&exec_id)
                .await
                .map_err(|e| SandboxError::WaitFailed(e.into()))?;
            if inspect.running == Some(false) {
                return Ok(inspect.exit_code.unwrap_or(-1));
            }
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
                _ = ctx.cancel.cancelled() => return Err(SandboxError::Canceled),
            }
        }
    }

    async fn read_logs(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<String> {
        let record = self.record(id).await?;
        let ready_rx = record
            .ready_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| SandboxError::ReadLogsFailed(anyhow::anyhow!("read_logs called twice")))?;

        tokio::select! {
            result = ready_rx => {
                result.map_err(|_| SandboxError::ReadLogsFailed(anyhow::anyhow!("output reader dropped")))?;
            }
            _ = ctx.cancel.cancelled() => return Err(SandboxError::Canceled),
        }

        let output = record.output.lock().await.take().unwrap_or_default();
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    async fn load_file(&self, _ctx: &SandboxCtx, id: &SandboxId, path: &str) -> SandboxResult<Vec<u8>> {
        let record = self.record(id).await?;
        let cmd = vec!["cat".to_string(), path.to_string()];
        let (status, out) = run_exec(&self.docker, &record.container_id, cmd, None)
            .await
            .map_err(SandboxError::LoadFileFailed)?;
        if status != 0 {
            return Err(SandboxError::LoadFileFailed(anyhow::anyhow!(
                "cat {path} exited {status}"
            )));
        }
        Ok(out)
    }

    async fn remove(&self, _ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<()> {
        let Some(record) = self.records.lock().await.remove(id) else {
            return Ok(());
        };
        match self
            .docker
            .remove_container(
                &record.container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(SandboxError::RemoveFailed(e.into())),
        }
    }
}

/// Execs a one-shot command to completion inside an already-running
/// container, optionally streaming `stdin`, returning its exit status and
/// demultiplexed stdout+stderr.
async fn run_exec(
    docker: &Docker,
    container_id: &str,
    cmd: Vec<String>,
    stdin: Option<Vec<u8>>,
) -> anyhow::Result<(i64, Vec<u8>)> {
    let exec = docker
        .create_exec(
            container_id,
            CreateExecOptions {
                cmd: Some(cmd),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                attach_stdin: Some(stdin.is_some()),
                ..Default::default()
            },
        )
        .await?;

    let start_result = docker.start_exec(&exec.id, None).await?;
    let mut output = Vec::new();
    if let StartExecResults::Attached { mut output: stream, mut input } = start_result {
        if let Some(stdin) = stdin {
            if let Some(input) = input.as_mut() {
                input.write_all(&stdin).await?;
                input.shutdown().await?;
            }
        }
        while let Some(msg) = stream.next().await {
            match msg? {
                LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                    output.extend_from_slice(&message);
                }
                _ => {}
            }
        }
    }

    let inspect = docker.inspect_exec(&exec.id).await?;
    Ok((inspect.exit_code.unwrap_or(-1), output))
}
