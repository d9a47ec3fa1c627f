//! Decorator: wraps another [`SandboxManager`] with a counting semaphore of
//! capacity K, bounding the total number of in-flight operations (not just
//! live sandboxes).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{SandboxCtx, SandboxError, SandboxId, SandboxManager, SandboxResult, StatusCode};

pub struct LimitManager<M> {
    inner: Arc<M>,
    semaphore: Arc<Semaphore>,
}

impl<M> LimitManager<M> {
    pub fn new(inner: Arc<M>, capacity: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    async fn acquire(&self, ctx: &SandboxCtx) -> SandboxResult<tokio::sync::SemaphorePermit<'_>> {
        tokio::select! {
            permit = self.semaphore.acquire() => {
                Ok(permit.expect("semaphore is never closed"))
            }
            _ = ctx.cancel.cancelled() => Err(SandboxError::Canceled),
        }
    }
}

#[async_trait]
impl<M: SandboxManager> SandboxManager for LimitManager<M> {
    async fn create(&self, ctx: &SandboxCtx, image: &str, cmd: Vec<String>) -> SandboxResult<SandboxId> {
        let _permit = self.acquire(ctx).await?;
        self.inner.create(ctx, image, cmd).await
    }

    async fn copy_file_in(
        &self,
        ctx: &SandboxCtx,
        id: &SandboxId,
        path: &str,
        mode: u32,
        data: Vec<u8>,
    ) -> SandboxResult<()> {
        let _permit = self.acquire(ctx).await?;
        self.inner.copy_file_in(ctx, id, path, mode, data).await
    }

    async fn start(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<()> {
        let _permit = self.acquire(ctx).await?;
        self.inner.start(ctx, id).await
    }

    async fn wait(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<StatusCode> {
        let _permit = self.acquire(ctx).await?;
        self.inner.wait(ctx, id).await
    }

    async fn read_logs(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<String> {
        let _permit = self.acquire(ctx).await?;
        self.inner.read_logs(ctx, id).await
    }

    async fn load_file(&self, ctx: &SandboxCtx, id: &SandboxId, path: &str) -> SandboxResult<Vec<u8>> {
        let _permit = self.acquire(ctx).await?;
        self.inner.load_file(ctx, id, path).await
    }

    async fn remove(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<()> {
        let _permit = self.acquire(ctx).await?;
        self.inner.remove(ctx, id).await
    }
}
