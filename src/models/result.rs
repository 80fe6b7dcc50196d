use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::TestStatus;

pub const PASSED_MESSAGE: &str = "Test passed successfully";
pub const SKIPPED_MESSAGE: &str = "Test skipped";
pub const FAILED_MESSAGE: &str = "Test failed";

/// Key under which an errored test stores its fault trace.
pub const TRACEBACK_KEY: &str = "traceback";

/// Classified result of a single probe invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub status: TestStatus,
    pub duration_ms: f64,
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
}

impl TestOutcome {
    pub fn passed(name: impl Into<String>, elapsed: Duration) -> Self {
        Self::new(name, TestStatus::Passed, elapsed, PASSED_MESSAGE.to_string())
    }

    pub fn skipped(name: impl Into<String>, elapsed: Duration, reason: String) -> Self {
        let message = non_empty_or(reason, SKIPPED_MESSAGE);
        Self::new(name, TestStatus::Skipped, elapsed, message)
    }

    pub fn failed(name: impl Into<String>, elapsed: Duration, message: String) -> Self {
        let message = non_empty_or(message, FAILED_MESSAGE);
        Self::new(name, TestStatus::Failed, elapsed, message)
    }

    pub fn errored(
        name: impl Into<String>,
        elapsed: Duration,
        message: String,
        traceback: String,
    ) -> Self {
        let mut outcome = Self::new(name, TestStatus::Error, elapsed, message);
        outcome
            .details
            .insert(TRACEBACK_KEY.to_string(), Value::String(traceback));
        outcome
    }

    fn new(
        name: impl Into<String>,
        status: TestStatus,
        elapsed: Duration,
        message: String,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            message,
            details: BTreeMap::new(),
        }
    }
}

fn non_empty_or(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

/// Per-status counts. Serializes as an object that always carries all four keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub error: usize,
}

impl Summary {
    pub fn count(&self, status: TestStatus) -> usize {
        match status {
            TestStatus::Passed => self.passed,
            TestStatus::Failed => self.failed,
            TestStatus::Skipped => self.skipped,
            TestStatus::Error => self.error,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.error
    }
}

/// The whole run, written once to the report sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteReport {
    pub timestamp: String,
    pub host: String,
    pub port: u16,
    pub model_name: String,
    /// Seconds spent waiting for the server; `-1.0` when it never became ready.
    pub server_ready_time_s: f64,
    pub tests: Vec<TestOutcome>,
    pub summary: Summary,
}
