use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, ensure};
use futures_util::future::BoxFuture;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::client::Transport;
use crate::config::{ProbeConfig, TimeoutConfig};
use crate::models::TestOutcome;

/// What a probe concluded. Faults are the `Err` arm of the probe's `Result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Passed,
    /// The check does not apply to this server.
    Skipped(String),
    /// The server violated the probed contract.
    Failed(String),
}

impl ProbeOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        ProbeOutcome::Failed(message.into())
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        ProbeOutcome::Skipped(reason.into())
    }
}

/// Read-only state shared by every probe in a run.
pub struct ProbeContext {
    pub transport: Arc<dyn Transport>,
    /// Model id discovered by the readiness probe.
    pub model: String,
    pub timeouts: TimeoutConfig,
    pub probes: ProbeConfig,
}

pub type ProbeFuture = BoxFuture<'static, Result<ProbeOutcome>>;
pub type ProbeFn = fn(Arc<ProbeContext>) -> ProbeFuture;

/// A named entry in the registry.
#[derive(Clone, Copy)]
pub struct TestCase {
    pub name: &'static str,
    pub run: ProbeFn,
}

impl TestCase {
    pub const fn new(name: &'static str, run: ProbeFn) -> Self {
        Self { name, run }
    }
}

/// Runs an ordered registry of probes one after another, isolating each one.
pub struct TestHarness {
    cases: Vec<TestCase>,
    skip: HashSet<String>,
}

impl TestHarness {
    pub fn new(cases: Vec<TestCase>) -> Result<Self> {
        let mut seen = HashSet::new();
        for case in &cases {
            ensure!(seen.insert(case.name), "duplicate test name '{}'", case.name);
        }
        Ok(Self {
            cases,
            skip: HashSet::new(),
        })
    }

    /// Record the named probes as skipped instead of running them.
    pub fn with_skipped(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.skip.extend(names);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.cases.iter().map(|c| c.name)
    }

    /// Run every registered probe in registration order.
    pub async fn run(&self, ctx: Arc<ProbeContext>) -> Vec<TestOutcome> {
        let mut outcomes = Vec::with_capacity(self.cases.len());
        for case in &self.cases {
            info!("Running test: {}...", case.name);
            let outcome = if self.skip.contains(case.name) {
                TestOutcome::skipped(case.name, Duration::ZERO, "Skipped by configuration".into())
            } else {
                run_case(case, Arc::clone(&ctx)).await
            };

            info!(
                "{} {}: {}",
                outcome.status.icon(),
                case.name,
                outcome.status.as_str().to_uppercase()
            );
            if outcome.status.is_failure() {
                warn!("    -> {}", outcome.message);
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Run one probe in its own task and classify whatever it produced.
pub async fn run_case(case: &TestCase, ctx: Arc<ProbeContext>) -> TestOutcome {
    let start = Instant::now();
    let joined = tokio::spawn((case.run)(ctx)).await;
    let elapsed = start.elapsed();

    match joined {
        Ok(Ok(ProbeOutcome::Passed)) => TestOutcome::passed(case.name, elapsed),
        Ok(Ok(ProbeOutcome::Skipped(reason))) => TestOutcome::skipped(case.name, elapsed, reason),
        Ok(Ok(ProbeOutcome::Failed(message))) => TestOutcome::failed(case.name, elapsed, message),
        Ok(Err(e)) => {
            TestOutcome::errored(case.name, elapsed, format!("{:#}", e), format!("{:?}", e))
        }
        Err(join_err) => {
            let message = if join_err.is_panic() {
                format!("probe panicked: {}", panic_message(join_err.into_panic()))
            } else {
                "probe task was cancelled".to_string()
            };
            TestOutcome::errored(case.name, elapsed, message.clone(), message)
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use futures_util::FutureExt;

    use super::*;
    use crate::client::testing::ScriptedTransport;
    use crate::models::TestStatus;
    use crate::models::result::{PASSED_MESSAGE, TRACEBACK_KEY};

    fn ctx() -> Arc<ProbeContext> {
        Arc::new(ProbeContext {
            transport: Arc::new(ScriptedTransport::new()),
            model: "test-model".into(),
            timeouts: TimeoutConfig::default(),
            probes: ProbeConfig::default(),
        })
    }

    fn passes(_: Arc<ProbeContext>) -> ProbeFuture {
        async { Ok(ProbeOutcome::Passed) }.boxed()
    }

    fn skips(_: Arc<ProbeContext>) -> ProbeFuture {
        async { Ok(ProbeOutcome::skipped("")) }.boxed()
    }

    fn fails(_: Arc<ProbeContext>) -> ProbeFuture {
        async { Ok(ProbeOutcome::failed("Expected 1 choice, got 2")) }.boxed()
    }

    fn fails_silently(_: Arc<ProbeContext>) -> ProbeFuture {
        async { Ok(ProbeOutcome::failed("")) }.boxed()
    }

    fn faults(_: Arc<ProbeContext>) -> ProbeFuture {
        async {
            let io: std::io::Result<ProbeOutcome> = Err(std::io::Error::other("connection reset"));
            io.context("request to /v1/completions failed")
        }
        .boxed()
    }

    fn panics(_: Arc<ProbeContext>) -> ProbeFuture {
        async {
            let choices: Vec<u8> = Vec::new();
            let _ = choices[0];
            Ok(ProbeOutcome::Passed)
        }
        .boxed()
    }

    fn uses_model(ctx: Arc<ProbeContext>) -> ProbeFuture {
        async move {
            if ctx.model == "test-model" {
                Ok(ProbeOutcome::Passed)
            } else {
                Ok(ProbeOutcome::failed(format!("wrong model {}", ctx.model)))
            }
        }
        .boxed()
    }

    #[tokio::test]
    async fn classifies_every_outcome_in_order() {
        let harness = TestHarness::new(vec![
            TestCase::new("passes", passes),
            TestCase::new("skips", skips),
            TestCase::new("fails", fails),
            TestCase::new("fails_silently", fails_silently),
            TestCase::new("faults", faults),
            TestCase::new("panics", panics),
            TestCase::new("uses_model", uses_model),
        ])
        .unwrap();

        let outcomes = harness.run(ctx()).await;
        let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(
            names,
            ["passes", "skips", "fails", "fails_silently", "faults", "panics", "uses_model"]
        );

        assert_eq!(outcomes[0].status, TestStatus::Passed);
        assert_eq!(outcomes[0].message, PASSED_MESSAGE);

        assert_eq!(outcomes[1].status, TestStatus::Skipped);
        assert_eq!(outcomes[1].message, "Test skipped");

        assert_eq!(outcomes[2].status, TestStatus::Failed);
        assert_eq!(outcomes[2].message, "Expected 1 choice, got 2");

        assert_eq!(outcomes[3].status, TestStatus::Failed);
        assert_eq!(outcomes[3].message, "Test failed");

        assert_eq!(outcomes[4].status, TestStatus::Error);
        assert!(outcomes[4].message.contains("request to /v1/completions failed"));
        assert!(outcomes[4].message.contains("connection reset"));
        let trace = outcomes[4].details[TRACEBACK_KEY].as_str().unwrap();
        assert!(trace.contains("Caused by"), "{trace}");

        assert_eq!(outcomes[5].status, TestStatus::Error);
        assert!(outcomes[5].message.starts_with("probe panicked: "));
        assert!(outcomes[5].details.contains_key(TRACEBACK_KEY));

        // Earlier faults and panics do not leak into later probes.
        assert_eq!(outcomes[6].status, TestStatus::Passed);
        assert!(outcomes.iter().all(|o| o.duration_ms >= 0.0));
    }

    #[tokio::test]
    async fn configured_skips_are_not_run() {
        let harness = TestHarness::new(vec![
            TestCase::new("faults", faults),
            TestCase::new("passes", passes),
        ])
        .unwrap()
        .with_skipped(["faults".to_string()]);

        let outcomes = harness.run(ctx()).await;
        assert_eq!(outcomes[0].status, TestStatus::Skipped);
        assert_eq!(outcomes[0].message, "Skipped by configuration");
        assert_eq!(outcomes[0].duration_ms, 0.0);
        assert_eq!(outcomes[1].status, TestStatus::Passed);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = TestHarness::new(vec![
            TestCase::new("passes", passes),
            TestCase::new("passes", fails),
        ])
        .err()
        .unwrap();
        assert!(err.to_string().contains("duplicate test name 'passes'"));
    }
}
