//! Strategy A: one container per command; `cmd` is the container's
//! entrypoint. Plain container lifecycle, logs read through the runtime's
//! framed log stream and demultiplexed by [`super::logframe`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, DownloadFromContainerOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use futures::StreamExt;
use tokio::sync::Mutex;

use super::{SandboxCtx, SandboxError, SandboxId, SandboxManager, SandboxResult, StatusCode, logframe};

struct Record {
    container_id: String,
}

/// Direct strategy: `Create` provisions a container with `cmd` as its
/// entrypoint, `Start` launches it, `Wait` observes the top-level process.
pub struct DirectManager {
    docker: Docker,
    records: Mutex<HashMap<SandboxId, Arc<Record>>>,
}

impl DirectManager {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
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
}

#[async_trait]
impl SandboxManager for DirectManager {
    async fn create(&self, _ctx: &SandboxCtx, image: &str, cmd: Vec<String>) -> SandboxResult<SandboxId> {
        let name = format!("coderunner-{}", uuid::Uuid::new_v4());
        let config = ContainerConfig {
            image: Some(image.to_string()),
            cmd: Some(cmd),
            tty: Some(false),
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

        let id = SandboxId(name);
        self.records.lock().await.insert(
            id.clone(),
            Arc::new(Record {
                container_id: response.id,
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
        let archive = tar_single_file(path, mode, &data).map_err(SandboxError::CopyInFailed)?;
        self.docker
            .upload_to_container(
                &record.container_id,
                Some(UploadToContainerOptions {
                    path: "/".to_string(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
            .map_err(|e| SandboxError::CopyInFailed(e.into()))
    }

    async fn start(&self, _ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<()> {
        let record = self.record(id).await?;
        self.docker
            .start_container(&record.container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::StartFailed(e.into()))
    }

    async fn wait(&self, _ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<StatusCode> {
        let record = self.record(id).await?;
        let mut stream = self
            .docker
            .wait_container(&record.container_id, None::<WaitContainerOptions<String>>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(e)) => Err(SandboxError::WaitFailed(e.into())),
            None => Err(SandboxError::WaitFailed(anyhow::anyhow!(
                "wait stream ended with no response"
            ))),
        }
    }

    async fn read_logs(&self, _ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<String> {
        let record = self.record(id).await?;
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(&record.container_id, Some(options));
        let mut framed = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SandboxError::ReadLogsFailed(e.into()))?;
            framed.extend_from_slice(chunk.into_bytes().as_ref());
        }
        logframe::demux_to_string(&framed)
    }

    async fn load_file(&self, _ctx: &SandboxCtx, id: &SandboxId, path: &str) -> SandboxResult<Vec<u8>> {
        let record = self.record(id).await?;
        let mut stream = self.docker.download_from_container(
            &record.container_id,
            Some(DownloadFromContainerOptions { path: path.to_string() }),
        );
        let mut tar_bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SandboxError::LoadFileFailed(e.into()))?;
            tar_bytes.extend_from_slice(&chunk);
        }
        untar_single_file(&tar_bytes).map_err(SandboxError::LoadFileFailed)
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

fn tar_single_file(path: &str, mode: u32, data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_path(path.trim_start_matches('/'))?;
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(builder.into_inner()?)
}

fn untar_single_file(tar_bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut archive = tar::Archive::new(tar_bytes);
    let mut entries = archive.entries()?;
    let mut entry = entries
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty tar archive"))??;
    let mut buf = Vec::new();
    std::io::Read::read_to_end(&mut entry, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tar_then_untar_round_trips_file_contents() {
        let archive = tar_single_file("/app/output", 0o755, b"ELF binary contents").unwrap();
        let recovered = untar_single_file(&archive).unwrap();
        assert_eq!(recovered, b"ELF binary contents");
    }

    #[test]
    fn untar_rejects_an_empty_archive() {
        let empty = tar::Builder::new(Vec::new()).into_inner().unwrap();
        assert!(untar_single_file(&empty).is_err());
    }
}
