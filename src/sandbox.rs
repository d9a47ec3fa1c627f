//! Abstract facade over a container runtime: create / copy-in / start / wait /
//! read-logs / load-file / remove. Two concrete strategies ([`direct`] and
//! [`tmpfs`]) and two composable decorators ([`retry`] and [`limit`]) sit
//! behind the same [`SandboxManager`] trait, so callers never need to know
//! which strategy, or which decorators, back a given instance.

pub mod direct;
pub mod limit;
pub mod logframe;
pub mod retry;
pub mod tmpfs;

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Opaque identifier for one sandbox instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxId(pub String);

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SandboxId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Exit status of a sandbox's command.
pub type StatusCode = i64;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to create sandbox: {0}")]
    CreateFailed(#[source] anyhow::Error),
    #[error("failed to copy file into sandbox: {0}")]
    CopyInFailed(#[source] anyhow::Error),
    #[error("failed to start sandbox: {0}")]
    StartFailed(#[source] anyhow::Error),
    #[error("failed to wait for sandbox: {0}")]
    WaitFailed(#[source] anyhow::Error),
    #[error("failed to read logs from sandbox: {0}")]
    ReadLogsFailed(#[source] anyhow::Error),
    #[error("failed to load file from sandbox: {0}")]
    LoadFileFailed(#[source] anyhow::Error),
    #[error("failed to remove sandbox: {0}")]
    RemoveFailed(#[source] anyhow::Error),
    #[error("unknown sandbox id: {0}")]
    NotFound(SandboxId),
    #[error("operation canceled")]
    Canceled,
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SandboxError {
    /// An error is retryable unless it is a cancellation or a deadline
    /// exceedance; every other kind may be a transient runtime blip.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SandboxError::Canceled | SandboxError::DeadlineExceeded)
    }
}

pub type SandboxResult<T> = Result<T, SandboxError>;

/// Carries the root cancellation token threaded through every sandbox-manager
/// operation.
#[derive(Clone)]
pub struct SandboxCtx {
    pub cancel: CancellationToken,
}

impl SandboxCtx {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }
}

/// The sandbox-manager contract. SandboxId is opaque; callers never construct
/// or inspect one beyond passing it back to a later call.
#[async_trait]
pub trait SandboxManager: Send + Sync {
    /// Provisions an isolated environment running `image` and records `cmd`
    /// as the command to run. May or may not start execution immediately,
    /// depending on the strategy.
    async fn create(&self, ctx: &SandboxCtx, image: &str, cmd: Vec<String>) -> SandboxResult<SandboxId>;

    /// Places `data` at absolute `path` inside the sandbox with Unix mode
    /// `mode`, creating parent directories. Idempotent on repeat with
    /// identical arguments.
    async fn copy_file_in(
        &self,
        ctx: &SandboxCtx,
        id: &SandboxId,
        path: &str,
        mode: u32,
        data: Vec<u8>,
    ) -> SandboxResult<()>;

    /// Begins executing `cmd`.
    async fn start(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<()>;

    /// Blocks until `cmd` terminates; returns its exit status.
    async fn wait(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<StatusCode>;

    /// Returns the merged stdout+stderr of `cmd`. Callable after `wait`;
    /// callers must not call this more than once per sandbox.
    async fn read_logs(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<String>;

    /// Reads a file from the sandbox filesystem.
    async fn load_file(&self, ctx: &SandboxCtx, id: &SandboxId, path: &str) -> SandboxResult<Vec<u8>>;

    /// Destroys the sandbox and reclaims resources. Idempotent; silently
    /// succeeds if the sandbox is already gone.
    async fn remove(&self, ctx: &SandboxCtx, id: &SandboxId) -> SandboxResult<()>;
}
