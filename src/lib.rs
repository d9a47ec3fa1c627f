//! # coderunner
//!
//! A distributed code-execution judge: receives submissions referencing
//! source code and a test set in an object store, compiles the source in an
//! isolated sandbox, runs the resulting executable once per test case in a
//! fresh sandbox, compares output, and publishes per-test and per-task
//! results to a pub/sub bus.
//!
//! ## Pipeline
//!
//! A submission flows through three stages, each a bounded producer/consumer
//! stage connected by `tokio::sync::mpsc` channels:
//!
//! - [`ingress`] subscribes to the task-submission channel, persists each
//!   newborn [`model::Task`] under its kv key, and forwards it to the
//!   compile queue.
//! - [`compile`] is a worker pool that compiles the submitted source in a
//!   sandbox and, on success, stores the resulting executable and forwards
//!   the task to the test queue.
//! - [`test_handler`] is a worker pool that fans out one sandbox run per
//!   test case, publishes each [`model::TestResult`] as it completes, and
//!   publishes the final completed [`model::Task`] only after every one of
//!   its test results has gone out.
//!
//! ## Sandboxes
//!
//! All sandboxed execution goes through the [`sandbox::SandboxManager`]
//! trait. Two strategies implement it directly:
//!
//! - [`sandbox::direct::DirectManager`] — one container per command.
//! - [`sandbox::tmpfs::TmpfsExecManager`] — a long-lived idle container per
//!   sandbox with tmpfs-backed scratch space, the real command run as an
//!   exec inside it.
//!
//! Two decorators compose over either strategy:
//!
//! - [`sandbox::retry::RetryManager`] retries transient failures.
//! - [`sandbox::limit::LimitManager`] bounds the number of concurrent
//!   sandbox-manager operations with a semaphore.
//!
//! ## Collaborators
//!
//! - [`files`] abstracts the object store (backed by an S3-compatible
//!   endpoint such as MinIO).
//! - [`bus`] abstracts the pub/sub + key-value bus (backed by Redis).
//! - [`config`] reads bootstrap configuration from the process environment.

pub mod bus;
pub mod compile;
pub mod config;
pub mod files;
pub mod ingress;
pub mod model;
pub mod sandbox;
pub mod test_handler;

pub use bus::{Bus, RedisBus};
pub use config::Config;
pub use files::{FilesManager, S3Files};
pub use model::{FileLocation, StartTaskCommand, Task, TaskState, Test, TestResult};
pub use sandbox::{SandboxCtx, SandboxId, SandboxManager};
