//! Waiting for the server under test to come up with a model loaded.

use std::time::Duration;

use anyhow::Result;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::client::Transport;

pub const MODELS_PATH: &str = "/v1/models";

#[derive(Debug, Clone, PartialEq)]
pub struct Readiness {
    pub ready: bool,
    /// Id of the first listed model; empty when the server never became ready.
    pub model_id: String,
    pub elapsed: Duration,
}

/// One poll of the models listing.
#[derive(Debug, PartialEq, Eq)]
enum Attempt {
    Ready(String),
    NotYet(String),
}

/// Poll the models listing until it names a model or `max_wait` has elapsed.
///
/// Every failure mode short of the deadline (refused connections, timeouts, error
/// statuses, empty listings) only means "not yet" and is retried.
pub async fn probe(
    transport: &dyn Transport,
    max_wait: Duration,
    poll_interval: Duration,
    request_timeout: Duration,
) -> Readiness {
    info!(
        "Waiting for server at {} (max {}s)...",
        transport.base_url(),
        max_wait.as_secs()
    );

    let start = Instant::now();
    let mut attempts = 0u32;
    while start.elapsed() < max_wait {
        attempts += 1;
        match poll_once(transport, request_timeout).await {
            Ok(Attempt::Ready(model_id)) => {
                let elapsed = start.elapsed();
                info!(
                    "Server ready after {:.1}s ({} attempts). Model: {}",
                    elapsed.as_secs_f64(),
                    attempts,
                    model_id
                );
                return Readiness {
                    ready: true,
                    model_id,
                    elapsed,
                };
            }
            Ok(Attempt::NotYet(reason)) => info!("  {}", reason),
            Err(e) => info!("  Server not reachable yet: {:#}", e),
        }
        sleep(poll_interval).await;
    }

    warn!(
        "Server did not become ready within {}s ({} attempts)",
        max_wait.as_secs(),
        attempts
    );
    Readiness {
        ready: false,
        model_id: String::new(),
        elapsed: start.elapsed(),
    }
}

async fn poll_once(transport: &dyn Transport, timeout: Duration) -> Result<Attempt> {
    let response = transport.get(MODELS_PATH, timeout).await?;
    if !response.is_ok() {
        return Ok(Attempt::NotYet(format!(
            "Server returned status {}",
            response.status
        )));
    }

    let body = response.json()?;
    let first = body
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|models| models.first());
    let Some(first) = first else {
        return Ok(Attempt::NotYet(
            "Server responded but no models loaded yet...".into(),
        ));
    };

    match first.get("id").and_then(|id| id.as_str()) {
        Some(id) => Ok(Attempt::Ready(id.to_string())),
        None => Ok(Attempt::NotYet("First listed model has no id yet...".into())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::client::testing::{Reply, ScriptedTransport};

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_through_transient_conditions() {
        let transport = ScriptedTransport::new()
            .on(MODELS_PATH, Reply::Fault("connection refused".into()))
            .on(MODELS_PATH, Reply::Text(503, "loading".into()))
            .on(MODELS_PATH, Reply::Text(200, "<html>".into()))
            .on(MODELS_PATH, Reply::Json(200, json!({"data": []})))
            .on(
                MODELS_PATH,
                Reply::Json(200, json!({"data": [{"id": "llama-3"}, {"id": "other"}]})),
            );

        let readiness = probe(&transport, secs(60), secs(5), secs(10)).await;
        assert!(readiness.ready);
        assert_eq!(readiness.model_id, "llama-3");
        assert_eq!(readiness.elapsed, secs(20));
        assert_eq!(transport.requests().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_the_deadline() {
        let transport = ScriptedTransport::new();
        let readiness = probe(&transport, secs(30), secs(5), secs(10)).await;
        assert!(!readiness.ready);
        assert!(readiness.model_id.is_empty());
        assert!(readiness.elapsed >= secs(30));
        // attempts at t = 0, 5, 10, 15, 20, 25
        assert_eq!(transport.requests().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn model_without_id_is_not_ready() {
        let transport = ScriptedTransport::new()
            .on(MODELS_PATH, Reply::Json(200, json!({"data": [{"object": "model"}]})))
            .on(MODELS_PATH, Reply::Json(200, json!({"data": [{"id": "m"}]})));
        let readiness = probe(&transport, secs(60), secs(5), secs(10)).await;
        assert_eq!(readiness.model_id, "m");
        assert_eq!(readiness.elapsed, secs(5));
    }

    #[tokio::test]
    async fn ready_on_first_poll() {
        let transport = ScriptedTransport::new()
            .on(MODELS_PATH, Reply::Json(200, json!({"data": [{"id": "m"}]})));
        assert_eq!(
            poll_once(&transport, secs(1)).await.unwrap(),
            Attempt::Ready("m".into())
        );
    }
}
