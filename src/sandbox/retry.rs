//! Decorator: wraps another [`SandboxManager`] and retries every operation
//! up to N attempts total with a fixed delay, skipping cancellation and
//! deadline errors.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{SandboxCtx, SandboxError, SandboxId, SandboxManager, SandboxResult, StatusCode};

pub struct RetryManager<M> {
    inner: Arc<M>,
    attempts: usize,
    delay: Duration,
}

impl<M> RetryManager<M> {
    pub fn new(inner: Arc<M>, attempts: usize, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Runs `op` up to `self.attempts` times total, counting the first call
    /// as attempt 1 of N. Stops immediately on a non-retryable error; on
    /// exhaustion, wraps the last error with an "after N attempts" context.
    async fn with_retry<T, F, Fut>(&self, ctx: &SandboxCtx, mut op: F) -> SandboxResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SandboxResult<T>>,
    {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    last_err = Some(err);
                    if attempt == self.attempts {
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.delay) => {}
                        _ = ctx.cancel.cancelled() => return Err(SandboxError::Canceled),
                    }
                }
            }
        }
        let attempts = self.attempts;
        Err(SandboxError::Other(anyhow::anyhow!(
            "{} (after {attempts} attempts)",
            last_err.expect("at least one attempt ran")
        )))
    }
}

#[async_trait]
impl<M: SandboxManager> SandboxManager for RetryManager<M> {
    async fn create(&self, ctx: &SandboxCtx, image: &str, cmd: Vec<String>) -> SandboxResult<SandboxId> {
        self.with_retry(ctx, || self.inner.create(ctx, image, cmd.clone())).await
    }

    async fn copy_file_in(
        &self,
        ctx: &SandboxCtx,
        id: &SandboxId,
        path: &str,
        mode: u32,
        data: Vec<u8>,
    ) -> SandboxResult<()> {
        self.with_retry(ctx, || self.inner.copy_file_in(ctx, id, path, mode, data.clone()))
            .await
    }

    async fn start(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<()> {
        self.with_retry(ctx, || self.inner.start(ctx, id)).await
    }

    async fn wait(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<StatusCode> {
        self.with_retry(ctx, || self.inner.wait(ctx, id)).await
    }

    async fn read_logs(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<String> {
        self.with_retry(ctx, || self.inner.read_logs(ctx, id)).await
    }

    async fn load_file(&self, ctx: &SandboxCtx, id: &SandboxId, path: &str) -> SandboxResult<Vec<u8>> {
        self.with_retry(ctx, || self.inner.load_file(ctx, id, path)).await
    }

    async fn remove(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<()> {
        self.with_retry(ctx, || self.inner.remove(ctx, id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct FlakyOnce {
        calls: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl SandboxManager for FlakyOnce {
        async fn create(&self, _ctx: &SandboxCtx, _image: &str, _cmd: Vec<String>) -> SandboxResult<SandboxId> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(SandboxError::Other(anyhow::anyhow!("transient blip")))
            } else {
                Ok(SandboxId("ok".into()))
            }
        }
        async fn copy_file_in(&self, _: &SandboxCtx, _: &SandboxId, _: &str, _: u32, _: Vec<u8>) -> SandboxResult<()> {
            unimplemented!()
        }
        async fn start(&self, _: &SandboxCtx, _: &SandboxId) -> SandboxResult<()> {
            unimplemented!()
        }
        async fn wait(&self, _: &SandboxCtx, _: &SandboxId) -> SandboxResult<StatusCode> {
            unimplemented!()
        }
        async fn read_logs(&self, _: &SandboxCtx, _: &SandboxId) -> SandboxResult<String> {
            unimplemented!()
        }
        async fn load_file(&self, _: &SandboxCtx, _: &SandboxId, _: &str) -> SandboxResult<Vec<u8>> {
            unimplemented!()
        }
        async fn remove(&self, _: &SandboxCtx, _: &SandboxId) -> SandboxResult<()> {
            unimplemented!()
        }
    }

    struct AlwaysNotFound;

    #[async_trait]
    impl SandboxManager for AlwaysNotFound {
        async fn create(&self, _: &SandboxCtx, _: &str, _: Vec<String>) -> SandboxResult<SandboxId> {
            Err(SandboxError::NotFound(SandboxId("x".into())))
        }
        async fn copy_file_in(&self, _: &SandboxCtx, _: &SandboxId, _: &str, _: u32, _: Vec<u8>) -> SandboxResult<()> {
            unimplemented!()
        }
        async fn start(&self, _: &SandboxCtx, _: &SandboxId) -> SandboxResult<()> {
            unimplemented!()
        }
        async fn wait(&self, _: &SandboxCtx, _: &SandboxId) -> SandboxResult<StatusCode> {
            unimplemented!()
        }
        async fn read_logs(&self, _: &SandboxCtx, _: &SandboxId) -> SandboxResult<String> {
            unimplemented!()
        }
        async fn load_file(&self, _: &SandboxCtx, _: &SandboxId, _: &str) -> SandboxResult<Vec<u8>> {
            unimplemented!()
        }
        async fn remove(&self, _: &SandboxCtx, _: &SandboxId) -> SandboxResult<()> {
            unimplemented!()
        }
    }

    struct AlwaysCanceled;

    #[async_trait]
    impl SandboxManager for AlwaysCanceled {
        async fn create(&self, _: &SandboxCtx, _: &str, _: Vec<String>) -> SandboxResult<SandboxId> {
            Err(SandboxError::Canceled)
        }
        async fn copy_file_in(&self, _: &SandboxCtx, _: &SandboxId, _: &str, _: u32, _: Vec<u8>) -> SandboxResult<()> {
            unimplemented!()
        }
        async fn start(&self, _: &SandboxCtx, _: &SandboxId) -> SandboxResult<()> {
            unimplemented!()
        }
        async fn wait(&self, _: &SandboxCtx, _: &SandboxId) -> SandboxResult<StatusCode> {
            unimplemented!()
        }
        async fn read_logs(&self, _: &SandboxCtx, _: &SandboxId) -> SandboxResult<String> {
            unimplemented!()
        }
        async fn load_file(&self, _: &SandboxCtx, _: &SandboxId, _: &str) -> SandboxResult<Vec<u8>> {
            unimplemented!()
        }
        async fn remove(&self, _: &SandboxCtx, _: &SandboxId) -> SandboxResult<()> {
            unimplemented!()
        }
    }

    fn ctx() -> SandboxCtx {
        SandboxCtx::new(CancellationToken::new())
    }

    #[tokio::test]
    async fn succeeds_after_retrying_a_transient_error() {
        let inner = Arc::new(FlakyOnce {
            calls: AtomicUsize::new(0),
            fail_times: 2,
        });
        let retry = RetryManager::new(inner.clone(), 3, Duration::from_millis(1));
        let id = retry.create(&ctx(), "img", vec![]).await.unwrap();
        assert_eq!(id.0, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_wraps_the_error() {
        let inner = Arc::new(FlakyOnce {
            calls: AtomicUsize::new(0),
            fail_times: 10,
        });
        let retry = RetryManager::new(inner.clone(), 3, Duration::from_millis(1));
        let err = retry.create(&ctx(), "img", vec![]).await.unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_is_never_retried() {
        let retry = RetryManager::new(Arc::new(AlwaysCanceled), 5, Duration::from_millis(1));
        assert!(matches!(
            retry.create(&ctx(), "img", vec![]).await,
            Err(SandboxError::Canceled)
        ));
    }

    #[tokio::test]
    async fn other_error_kinds_are_retried_up_to_the_attempt_cap() {
        let retry = RetryManager::new(Arc::new(AlwaysNotFound), 2, Duration::from_millis(1));
        let err = retry.create(&ctx(), "img", vec![]).await.unwrap_err();
        assert!(err.to_string().contains("after 2 attempts"));
    }
}
