use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};

use crate::models::{Summary, TestOutcome, TestStatus, TestSuiteReport};

/// `server_ready_time_s` of a run whose server never became ready.
pub const NOT_READY_SENTINEL: f64 = -1.0;

impl Summary {
    pub fn tally(outcomes: &[TestOutcome]) -> Self {
        let mut summary = Summary::default();
        for outcome in outcomes {
            match outcome.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Failed => summary.failed += 1,
                TestStatus::Skipped => summary.skipped += 1,
                TestStatus::Error => summary.error += 1,
            }
        }
        summary
    }

    /// The summary of a run that never got past readiness: one error, nothing else.
    pub fn readiness_failure() -> Self {
        Summary {
            error: 1,
            ..Summary::default()
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 && self.error == 0 { 0 } else { 1 }
    }
}

impl TestSuiteReport {
    pub fn completed(
        host: &str,
        port: u16,
        model_name: &str,
        ready_after: Duration,
        tests: Vec<TestOutcome>,
    ) -> Self {
        let summary = Summary::tally(&tests);
        Self {
            timestamp: now(),
            host: host.to_string(),
            port,
            model_name: model_name.to_string(),
            server_ready_time_s: ready_after.as_secs_f64(),
            tests,
            summary,
        }
    }

    pub fn not_ready(host: &str, port: u16) -> Self {
        Self {
            timestamp: now(),
            host: host.to_string(),
            port,
            model_name: String::new(),
            server_ready_time_s: NOT_READY_SENTINEL,
            tests: Vec::new(),
            summary: Summary::readiness_failure(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.summary.exit_code()
    }

    /// Write the report as pretty JSON. The file is staged next to `path` and renamed
    /// into place, so readers never observe a half-written report.
    pub fn write(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut staged = tempfile::Builder::new()
            .prefix(".inferprobe-report-")
            .suffix(".json")
            .tempfile_in(dir)
            .with_context(|| format!("failed to create temp report in {}", dir.display()))?;

        serde_json::to_writer_pretty(&mut staged, self).context("failed to serialize report")?;
        staged
            .write_all(b"\n")
            .and_then(|_| staged.flush())
            .context("failed to write report")?;

        staged
            .persist(path)
            .with_context(|| format!("failed to move report into {}", path.display()))?;
        Ok(())
    }

    /// Print the human-readable summary block.
    pub fn print_summary(&self) {
        let rule = "=".repeat(60);
        println!("\n{}", rule);
        println!("Test Summary");
        println!("{}", rule);
        for outcome in self.tests.iter().filter(|o| o.status != TestStatus::Passed) {
            println!(
                "  {} {:<30} {}",
                outcome.status.icon(),
                outcome.name,
                outcome.message
            );
        }
        println!("  Passed:  {}", self.summary.passed);
        println!("  Failed:  {}", self.summary.failed);
        println!("  Skipped: {}", self.summary.skipped);
        println!("  Errors:  {}", self.summary.error);
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
