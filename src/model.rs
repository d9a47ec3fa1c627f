//! The task record, its state enumeration, the submission command, the
//! per-test record, and the test-result record, with JSON codecs matching the
//! wire formats in the external-interfaces contract.

pub mod task;

pub use task::{FileLocation, StartTaskCommand, Task, TaskState};
pub use test::{Test, TestResult, normalize, outputs_match, parse_tests_blob};
