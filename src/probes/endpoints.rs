//! Non-generating endpoints and error-path checks.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{COMPLETIONS_PATH, unexpected_status};
use crate::readiness::MODELS_PATH;
use crate::runner::{ProbeContext, ProbeOutcome};

const NONEXISTENT_MODEL: &str = "nonexistent-model-12345";

pub async fn models_endpoint(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let response = ctx
        .transport
        .get(MODELS_PATH, ctx.timeouts.metadata())
        .await?;
    if !response.is_ok() {
        return Ok(unexpected_status(&response));
    }

    let out = response.json()?;
    let Some(data) = out.get("data") else {
        return Ok(ProbeOutcome::failed("Response missing 'data' field"));
    };
    match data {
        Value::Array(models) if !models.is_empty() => Ok(ProbeOutcome::Passed),
        Value::Array(_) | Value::Null => Ok(ProbeOutcome::failed("No models returned")),
        other => Ok(ProbeOutcome::failed(format!(
            "Expected 'data' to be a list of models, got {}",
            other
        ))),
    }
}

/// Best effort: any configured health path answering 200 passes, and a server that
/// exposes none of them also passes since `/v1/models` already proved it is up.
pub async fn health_endpoint(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    for path in &ctx.probes.health_paths {
        match ctx.transport.get(path, ctx.timeouts.light()).await {
            Ok(response) if response.is_ok() => {
                debug!("health endpoint {} answered 200", path);
                return Ok(ProbeOutcome::Passed);
            }
            Ok(response) => debug!("health endpoint {} returned {}", path, response.status),
            Err(e) => debug!("health endpoint {} unreachable: {:#}", path, e),
        }
    }

    info!("no dedicated health endpoint found; relying on {}", MODELS_PATH);
    Ok(ProbeOutcome::Passed)
}

/// Best effort like health: the first candidate that answers decides, and a server
/// exposing none of them passes.
pub async fn metrics_endpoint(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    for path in &ctx.probes.metrics_paths {
        let response = match ctx.transport.get(path, ctx.timeouts.metadata()).await {
            Ok(response) => response,
            Err(e) => {
                debug!("metrics endpoint {} unreachable: {:#}", path, e);
                continue;
            }
        };

        match response.status {
            200 if response.body.is_empty() => {
                return Ok(ProbeOutcome::failed(
                    "Metrics endpoint returned empty response",
                ));
            }
            200 => return Ok(ProbeOutcome::Passed),
            404 => debug!("metrics endpoint {} not exposed", path),
            status => {
                return Ok(ProbeOutcome::failed(format!(
                    "Unexpected status code: {}",
                    status
                )));
            }
        }
    }

    info!("no metrics endpoint exposed; metrics are optional");
    Ok(ProbeOutcome::Passed)
}

pub async fn invalid_model(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let body = json!({
        "model": NONEXISTENT_MODEL,
        "prompt": "Hello",
        "max_tokens": 10,
    });
    let response = ctx
        .transport
        .post_json(COMPLETIONS_PATH, &body, ctx.timeouts.metadata())
        .await?;

    if response.is_ok() {
        return Ok(ProbeOutcome::failed(
            "Expected error for invalid model, got 200",
        ));
    }
    Ok(ProbeOutcome::Passed)
}

/// Servers may either accept an empty prompt or reject it as a bad request.
pub async fn empty_prompt(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let body = json!({
        "model": ctx.model,
        "prompt": "",
        "max_tokens": 10,
    });
    let response = ctx
        .transport
        .post_json(COMPLETIONS_PATH, &body, ctx.timeouts.metadata())
        .await?;

    if !matches!(response.status, 200 | 400) {
        return Ok(ProbeOutcome::failed(format!(
            "Expected 200 or 400, got {}",
            response.status
        )));
    }
    Ok(ProbeOutcome::Passed)
}
