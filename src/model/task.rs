use serde::{Deserialize, Serialize};

use super::test::TestResult;

/// A pointer to a blob in the object store.
///
/// The Rust-side field names are `bucket`/`object`; the wire format uses
/// `bucketName`/`objectName` to match what submitters already send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    #[serde(rename = "bucketName")]
    pub bucket: String,
    #[serde(rename = "objectName")]
    pub object: String,
}

impl FileLocation {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
        }
    }
}

/// Inbound submission received on the task-submission channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTaskCommand {
    pub id: String,
    #[serde(rename = "codeLocation")]
    pub code_location: FileLocation,
    #[serde(rename = "testsLocation")]
    pub tests_location: FileLocation,
    pub compiler: String,
}

/// A Task's position in the compile -> test -> completed pipeline.
///
/// Transitions are monotonic: `Compiling -> Testing -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Compiling,
    Testing,
    Completed,
}

/// Mutable pipeline record for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "codeLocation")]
    pub code_location: FileLocation,
    #[serde(rename = "testsLocation")]
    pub tests_location: FileLocation,
    /// Meaningful iff `state` is `Testing` or `Completed`.
    #[serde(rename = "executableLocation", skip_serializing_if = "Option::is_none")]
    pub executable_location: Option<FileLocation>,
    pub compiler: String,
    pub state: TaskState,
    #[serde(rename = "testsResults", default)]
    pub tests_results: Vec<TestResult>,
    /// Set when the compiler invocation exits non-zero. See the compile-failure
    /// redesign: a Task whose command failed to compile is still published as
    /// completed, with this flag set and `compile_logs` carrying diagnostics.
    #[serde(rename = "compile_failed", default)]
    pub compile_failed: bool,
    #[serde(rename = "compile_logs", skip_serializing_if = "Option::is_none", default)]
    pub compile_logs: Option<String>,
}

impl Task {
    /// Builds the newborn Task for a just-received StartTaskCommand, in the
    /// `Compiling` state with no executable location yet.
    pub fn from_command(cmd: StartTaskCommand) -> Self {
        Self {
            id: cmd.id,
            code_location: cmd.code_location,
            tests_location: cmd.tests_location,
            executable_location: None,
            compiler: cmd.compiler,
            state: TaskState::Compiling,
            tests_results: Vec::new(),
            compile_failed: false,
            compile_logs: None,
        }
    }

    pub fn kv_key(id: &str) -> String {
        format!("task:{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_location_uses_wire_names() {
        let loc = FileLocation::new("code", "h.cpp");
        let json = serde_json::to_value(&loc).unwrap();
        assert_eq!(json["bucketName"], "code");
        assert_eq!(json["objectName"], "h.cpp");
    }

    #[test]
    fn start_task_command_round_trips() {
        let raw = r#"{
            "id": "t1",
            "codeLocation": {"bucketName": "code", "objectName": "h.cpp"},
            "testsLocation": {"bucketName": "tests", "objectName": "h.json"},
            "compiler": "gcc"
        }"#;
        let cmd: StartTaskCommand = serde_json::from_str(raw).unwrap();
        assert_eq!(cmd.id, "t1");
        assert_eq!(cmd.code_location.bucket, "code");

        let task = Task::from_command(cmd);
        assert_eq!(task.state, TaskState::Compiling);
        assert!(task.executable_location.is_none());
        assert!(!task.compile_failed);
    }

    #[test]
    fn task_json_round_trip_is_field_for_field() {
        let task = Task {
            id: "t1".into(),
            code_location: FileLocation::new("code", "h.cpp"),
            tests_location: FileLocation::new("tests", "h.json"),
            executable_location: Some(FileLocation::new("executables", "t1.out")),
            compiler: "gcc".into(),
            state: TaskState::Completed,
            tests_results: vec![TestResult {
                task_id: "t1".into(),
                test_id: 0,
                successful: true,
            }],
            compile_failed: false,
            compile_logs: None,
        };
        let json = serde_json::to_string(&task).unwrap();
        let round_tripped: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(task, round_tripped);
    }

    #[test]
    fn executable_location_omitted_while_compiling() {
        let task = Task::from_command(StartTaskCommand {
            id: "t1".into(),
            code_location: FileLocation::new("code", "h.cpp"),
            tests_location: FileLocation::new("tests", "h.json"),
            compiler: "gcc".into(),
        });
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("executableLocation").is_none());
    }

    #[test]
    fn kv_key_uses_the_task_prefix() {
        assert_eq!(Task::kv_key("abc"), "task:abc");
    }
}
