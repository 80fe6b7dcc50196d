use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use inferprobe::client::HttpClient;
use inferprobe::config::Config;
use inferprobe::models::TestSuiteReport;
use inferprobe::probes;
use inferprobe::readiness;
use inferprobe::runner::{ProbeContext, TestHarness};
use inferprobe::signal;

/// Exit status when the run is interrupted with Ctrl-C.
const INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "inferprobe", version, about = "Smoke-test an OpenAI-compatible inference server")]
struct Cli {
    /// Server hostname
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Path of the JSON report
    #[arg(long, required_unless_present = "list")]
    output: Option<PathBuf>,

    /// Minutes to wait for the server to list a model
    #[arg(long, default_value_t = 20)]
    max_wait: u64,

    /// Process to signal once the report is written
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    signal_pid: Option<u32>,

    /// Config file (defaults to ./inferprobe.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the registered tests in execution order and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let harness = TestHarness::new(probes::registry())?;
    if cli.list {
        for name in harness.names() {
            println!("{}", name);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load(&std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))),
    };

    match until_interrupted(run(&cli, config, harness), tokio::signal::ctrl_c()).await {
        Some(code) => code.map(ExitCode::from),
        None => {
            warn!("Interrupted; no report written");
            Ok(ExitCode::from(INTERRUPTED))
        }
    }
}

/// Drive `work` to completion unless `interrupt` fires first, in which case `None`.
/// A listener that fails to install is logged and the work carries on.
async fn until_interrupted<F, I>(work: F, interrupt: I) -> Option<F::Output>
where
    F: Future,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(work);
    let interrupted = tokio::select! {
        output = &mut work => return Some(output),
        interrupted = interrupt => interrupted,
    };
    match interrupted {
        Ok(()) => None,
        Err(e) => {
            warn!("Cannot listen for Ctrl-C, continuing without it: {}", e);
            Some(work.await)
        }
    }
}

async fn run(cli: &Cli, config: Config, harness: TestHarness) -> Result<u8> {
    let output = cli.output.as_deref().context("--output is required")?;
    let transport = Arc::new(HttpClient::new(
        format!("http://{}:{}", cli.host, cli.port),
        &config.headers,
    )?);

    let ready = readiness::probe(
        transport.as_ref(),
        Duration::from_secs(cli.max_wait.saturating_mul(60)),
        config.readiness.poll_interval(),
        config.readiness.request_timeout(),
    )
    .await;

    let report = if ready.ready {
        let ctx = Arc::new(ProbeContext {
            transport,
            model: ready.model_id.clone(),
            timeouts: config.timeouts.clone(),
            probes: config.probes.clone(),
        });
        let outcomes = harness
            .with_skipped(config.probes.skip.iter().cloned())
            .run(ctx)
            .await;
        TestSuiteReport::completed(&cli.host, cli.port, &ready.model_id, ready.elapsed, outcomes)
    } else {
        error!("Server did not become ready within {} minutes", cli.max_wait);
        TestSuiteReport::not_ready(&cli.host, cli.port)
    };

    let written = report.write(output);
    match &written {
        Ok(()) => info!("Results written to {}", output.display()),
        Err(e) => error!("{:#}", e),
    }
    if ready.ready {
        report.print_summary();
    }

    if let Some(pid) = cli.signal_pid {
        signal::notify(pid, config.signal.name);
    }

    if written.is_err() || report.exit_code() != 0 {
        return Ok(1);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::future::{pending, ready};

    use super::*;

    #[tokio::test]
    async fn interrupt_abandons_the_run() {
        let ctrl_c = ready(Ok::<_, std::io::Error>(()));
        assert_eq!(until_interrupted(pending::<u8>(), ctrl_c).await, None);
    }

    #[tokio::test]
    async fn failed_listener_lets_the_run_finish() {
        let work = async {
            tokio::task::yield_now().await;
            7u8
        };
        let broken = ready(Err::<(), _>(std::io::Error::other("no signal driver")));
        assert_eq!(until_interrupted(work, broken).await, Some(7));
    }

    #[tokio::test]
    async fn finished_run_wins() {
        let never = pending::<std::io::Result<()>>();
        assert_eq!(until_interrupted(ready(0u8), never).await, Some(0));
    }

    #[test]
    fn cli_rejects_zero_signal_pid() {
        let args = ["inferprobe", "--output", "r.json", "--signal-pid", "0"];
        assert!(Cli::try_parse_from(args).is_err());
        let cli = Cli::try_parse_from(["inferprobe", "--list"]).unwrap();
        assert!(cli.list && cli.output.is_none());
    }
}
