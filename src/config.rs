//! Bootstrap configuration, read entirely from the process environment.
//!
//! This worker is wired from `REDIS_*` / `MINIO_*` environment variables, the
//! `USE_TMPFS` strategy switch, and a set of worker-pool/queue/decorator
//! knobs that default to fixed values when unset, matching the same
//! fallible, context-annotated `std::env::var` pattern used throughout this
//! crate rather than a config file on disk.

use anyhow::{Context, Result};

/// Default worker pool size for the Compile Handler.
pub const DEFAULT_COMPILE_WORKERS: usize = 5;
/// Default worker pool size for the Test Handler.
pub const DEFAULT_TEST_WORKERS: usize = 3;
/// Default bounded compile-queue capacity.
pub const DEFAULT_COMPILE_QUEUE_CAPACITY: usize = 30;
/// Default bounded test-queue capacity (deliberately small; throttles how
/// many Tasks are mid-test at once, since each Task further fans out to N
/// sandboxes).
pub const DEFAULT_TEST_QUEUE_CAPACITY: usize = 2;

/// Default retry decorator total attempts (first attempt counts as 1 of N).
pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;
/// Default retry decorator delay between attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
/// Default concurrency-limit decorator capacity.
pub const DEFAULT_SANDBOX_CONCURRENCY_LIMIT: usize = 20;

pub const EXECUTABLES_BUCKET: &str = "executables";
pub const TASK_CHANNEL: &str = "coderunner_task_channel";
pub const COMPLETED_TESTS_CHANNEL: &str = "coderunner_completed_tests_channel";
pub const COMPLETED_TASKS_CHANNEL: &str = "coderunner_completed_tasks_channel";

/// The runner image every per-test sandbox is created from.
pub const RUNNER_IMAGE: &str = "coderunner-runner:latest";

const SRC_PATH: &str = "/app/main.cpp";
const EXEC_PATH: &str = "/app/output";
const RUNNER_EXEC_PATH: &str = "/app/exec.out";
const RUNNER_INPUT_PATH: &str = "/app/input.txt";

/// Which sandbox-manager strategy to run behind the decorators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStrategy {
    Direct,
    TmpfsExec,
}

/// Everything the worker needs to connect to its collaborators and tune its
/// pipeline, read from the environment at process start.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_host: String,
    pub redis_password: Option<String>,
    pub redis_db: i64,
    pub minio_endpoint: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub strategy: SandboxStrategy,
    pub compile_workers: usize,
    pub test_workers: usize,
    pub compile_queue_capacity: usize,
    pub test_queue_capacity: usize,
    pub sandbox_retry_attempts: usize,
    pub sandbox_retry_delay_ms: u64,
    pub sandbox_concurrency_limit: usize,
}

/// Parses an optional env var with a fallback default, annotating a malformed
/// (but present) value with the variable's name.
fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().with_context(|| format!("{name} must be a valid number")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Reads configuration from the environment. Fails fast (the worker has
    /// nothing useful to do without a bus and an object store); tuning knobs
    /// fall back to fixed defaults when unset.
    pub fn from_env() -> Result<Self> {
        let redis_host = std::env::var("REDIS_HOST").context("REDIS_HOST is not set")?;
        let redis_password = std::env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty());
        let redis_db = std::env::var("REDIS_DB")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .context("REDIS_DB must be an integer")?;
        let minio_endpoint = std::env::var("MINIO_ENDPOINT").context("MINIO_ENDPOINT is not set")?;
        let minio_access_key =
            std::env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY is not set")?;
        let minio_secret_key =
            std::env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY is not set")?;

        let strategy = match std::env::var("USE_TMPFS") {
            Ok(v) if v.eq_ignore_ascii_case("true") => SandboxStrategy::TmpfsExec,
            _ => SandboxStrategy::Direct,
        };

        Ok(Self {
            redis_host,
            redis_password,
            redis_db,
            minio_endpoint,
            minio_access_key,
            minio_secret_key,
            strategy,
            compile_workers: parse_env_or("COMPILE_WORKERS", DEFAULT_COMPILE_WORKERS)?,
            test_workers: parse_env_or("TEST_WORKERS", DEFAULT_TEST_WORKERS)?,
            compile_queue_capacity: parse_env_or(
                "COMPILE_QUEUE_CAPACITY",
                DEFAULT_COMPILE_QUEUE_CAPACITY,
            )?,
            test_queue_capacity: parse_env_or("TEST_QUEUE_CAPACITY", DEFAULT_TEST_QUEUE_CAPACITY)?,
            sandbox_retry_attempts: parse_env_or("SANDBOX_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS)?,
            sandbox_retry_delay_ms: parse_env_or("SANDBOX_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS)?,
            sandbox_concurrency_limit: parse_env_or(
                "SANDBOX_CONCURRENCY_LIMIT",
                DEFAULT_SANDBOX_CONCURRENCY_LIMIT,
            )?,
        })
    }

    /// `redis://[:password@]host[/db]`, the URL form the `redis` crate expects.
    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(password) => format!("redis://:{password}@{}/{}", self.redis_host, self.redis_db),
            None => format!("redis://{}/{}", self.redis_host, self.redis_db),
        }
    }
}

/// Paths and the compile command, kept next to the config that would in a
/// richer deployment make them overridable; here they are fixed constants.
pub struct CompilePaths;

impl CompilePaths {
    pub fn src_path() -> &'static str {
        SRC_PATH
    }
    pub fn exec_path() -> &'static str {
        EXEC_PATH
    }
    /// Always invokes `g++`, regardless of the submission's `compiler`
    /// field — the reference never consults it either (it's carried on the
    /// Task for downstream bookkeeping only, never passed to the compiler).
    pub fn compile_cmd() -> Vec<String> {
        vec![
            "g++".to_string(),
            SRC_PATH.to_string(),
            "-o".to_string(),
            EXEC_PATH.to_string(),
            "-static".to_string(),
        ]
    }
}

pub struct RunnerPaths;

impl RunnerPaths {
    pub fn exec_path() -> &'static str {
        RUNNER_EXEC_PATH
    }
    pub fn input_path() -> &'static str {
        RUNNER_INPUT_PATH
    }
    pub fn run_cmd() -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("{RUNNER_EXEC_PATH} < {RUNNER_INPUT_PATH}"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            redis_host: "localhost:6379".into(),
            redis_password: None,
            redis_db: 0,
            minio_endpoint: "localhost:9000".into(),
            minio_access_key: "a".into(),
            minio_secret_key: "b".into(),
            strategy: SandboxStrategy::Direct,
            compile_workers: DEFAULT_COMPILE_WORKERS,
            test_workers: DEFAULT_TEST_WORKERS,
            compile_queue_capacity: DEFAULT_COMPILE_QUEUE_CAPACITY,
            test_queue_capacity: DEFAULT_TEST_QUEUE_CAPACITY,
            sandbox_retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            sandbox_retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            sandbox_concurrency_limit: DEFAULT_SANDBOX_CONCURRENCY_LIMIT,
        }
    }

    #[test]
    fn redis_url_without_password() {
        let cfg = sample();
        assert_eq!(cfg.redis_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn redis_url_with_password() {
        let mut cfg = sample();
        cfg.redis_password = Some("s3cr3t".into());
        cfg.redis_db = 2;
        assert_eq!(cfg.redis_url(), "redis://:s3cr3t@localhost:6379/2");
    }

    #[test]
    fn compile_cmd_always_invokes_g_plus_plus() {
        let cmd = CompilePaths::compile_cmd();
        assert_eq!(cmd, vec!["g++", "/app/main.cpp", "-o", "/app/output", "-static"]);
    }

    #[test]
    fn runner_cmd_redirects_stdin_from_input_file() {
        assert_eq!(
            RunnerPaths::run_cmd(),
            vec!["sh", "-c", "/app/exec.out < /app/input.txt"]
        );
    }

    #[test]
    fn parse_env_or_falls_back_when_unset() {
        std::env::remove_var("CODERUNNER_TEST_KNOB_UNSET");
        let value: usize = parse_env_or("CODERUNNER_TEST_KNOB_UNSET", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn parse_env_or_rejects_a_malformed_value() {
        unsafe {
            std::env::set_var("CODERUNNER_TEST_KNOB_BAD", "not-a-number");
        }
        let result: Result<usize> = parse_env_or("CODERUNNER_TEST_KNOB_BAD", 1);
        unsafe {
            std::env::remove_var("CODERUNNER_TEST_KNOB_BAD");
        }
        assert!(result.is_err());
    }
}
