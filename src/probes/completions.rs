use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::warn;

use super::{
    COMPLETIONS_PATH, check_model_and_single_choice, check_stream, choices, first_choice,
    first_choice_text, unexpected_status, unexpected_status_with_body,
};
use crate::client::ApiResponse;
use crate::runner::{ProbeContext, ProbeOutcome};

const STOP_SEQUENCE: &str = "5";
const STOP_WORDS_MAX_TOKENS: u64 = 64;
const MAX_TOKENS_LIMIT: u64 = 10;

fn request(ctx: &ProbeContext, prompt: &str, max_tokens: u64) -> Value {
    json!({
        "model": ctx.model,
        "prompt": prompt,
        "temperature": 0,
        "max_tokens": max_tokens,
    })
}

async fn post(ctx: &ProbeContext, body: &Value) -> Result<ApiResponse> {
    ctx.transport
        .post_json(COMPLETIONS_PATH, body, ctx.timeouts.generation())
        .await
}

pub async fn basic(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let response = post(&ctx, &request(&ctx, "San Francisco is a", 32)).await?;
    if !response.is_ok() {
        return Ok(unexpected_status_with_body(&response));
    }

    let out = response.json()?;
    if let Some(failure) = check_model_and_single_choice(&ctx, &out) {
        return Ok(failure);
    }

    let choice = &choices(&out)[0];
    if choice.get("index").and_then(as_integer) != Some(0) {
        return Ok(ProbeOutcome::failed("Choice index should be 0"));
    }
    if choice.get("text").is_none() {
        return Ok(ProbeOutcome::failed("Choice missing 'text' field"));
    }
    Ok(ProbeOutcome::Passed)
}

/// Backends without logprob support may omit the field or return null; only a
/// present payload is checked, and only for internal consistency.
pub async fn with_logprobs(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let mut body = request(&ctx, "The quick brown fox", 16);
    body["logprobs"] = json!(1);

    let response = post(&ctx, &body).await?;
    if !response.is_ok() {
        return Ok(unexpected_status(&response));
    }

    let out = response.json()?;
    let logprobs = match first_choice(&out)?.get("logprobs") {
        None | Some(Value::Null) => return Ok(ProbeOutcome::Passed),
        Some(logprobs) => logprobs,
    };

    if let Some(tokens) = logprobs.get("tokens").and_then(Value::as_array) {
        if tokens.is_empty() {
            return Ok(ProbeOutcome::failed("Expected tokens in logprobs"));
        }
        if let Some(token_logprobs) = logprobs.get("token_logprobs").and_then(Value::as_array)
            && token_logprobs.len() != tokens.len()
        {
            return Ok(ProbeOutcome::failed(format!(
                "logprobs has {} tokens but {} token_logprobs",
                tokens.len(),
                token_logprobs.len()
            )));
        }
    }
    Ok(ProbeOutcome::Passed)
}

pub async fn streaming(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let mut body = request(&ctx, "Once upon a time", 32);
    body["stream"] = json!(true);
    check_stream(&ctx, COMPLETIONS_PATH, &body).await
}

/// Stop-sequence enforcement is advisory unless `strict_stop_sequences` is set: the
/// model may never emit the sequence at all, so only the token bound is binding.
pub async fn stop_words(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let mut body = request(
        &ctx,
        "List the numbers: 1, 2, 3, 4, 5, 6, 7, 8, 9, 10",
        STOP_WORDS_MAX_TOKENS,
    );
    body["stop"] = json!([STOP_SEQUENCE]);

    let response = post(&ctx, &body).await?;
    if !response.is_ok() {
        return Ok(unexpected_status(&response));
    }

    let out = response.json()?;
    let text = first_choice_text(&out)?;
    if let Some(failure) = check_completion_bound(&out, STOP_WORDS_MAX_TOKENS) {
        return Ok(failure);
    }

    if text.contains(STOP_SEQUENCE) {
        if ctx.probes.strict_stop_sequences {
            return Ok(ProbeOutcome::failed(format!(
                "Stop sequence '{}' appeared in completion: {:?}",
                STOP_SEQUENCE, text
            )));
        }
        warn!(
            "completion contains stop sequence '{}' (advisory): {:?}",
            STOP_SEQUENCE, text
        );
    }
    Ok(ProbeOutcome::Passed)
}

pub async fn max_tokens(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let mut body = request(&ctx, "Write a very long essay about", MAX_TOKENS_LIMIT);
    body["temperature"] = json!(0.7);

    let response = post(&ctx, &body).await?;
    if !response.is_ok() {
        return Ok(unexpected_status(&response));
    }

    let out = response.json()?;
    Ok(check_completion_bound(&out, MAX_TOKENS_LIMIT).unwrap_or(ProbeOutcome::Passed))
}

/// A missing usage block counts as zero completion tokens.
fn check_completion_bound(out: &Value, limit: u64) -> Option<ProbeOutcome> {
    let completion_tokens = as_integer(&out["usage"]["completion_tokens"]).unwrap_or(0);
    (completion_tokens > limit as i64).then(|| {
        ProbeOutcome::failed(format!(
            "Expected at most {} completion tokens, got {}",
            limit, completion_tokens
        ))
    })
}

/// Zero temperature must be deterministic: the same request twice yields the same text.
pub async fn temperature(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let body = request(&ctx, "The meaning of life is", 20);

    let first = post(&ctx, &body).await?;
    let second = post(&ctx, &body).await?;
    if !first.is_ok() || !second.is_ok() {
        return Ok(ProbeOutcome::failed(format!(
            "Expected status 200, got {} and {}",
            first.status, second.status
        )));
    }

    let first = first.json()?;
    let second = second.json()?;
    let text1 = first_choice_text(&first).context("first temperature-0 response")?;
    let text2 = first_choice_text(&second).context("second temperature-0 response")?;
    if text1 != text2 {
        return Ok(ProbeOutcome::failed(format!(
            "Temperature 0 should give deterministic results: {:?} != {:?}",
            text1, text2
        )));
    }
    Ok(ProbeOutcome::Passed)
}

pub async fn usage_stats(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let response = post(&ctx, &request(&ctx, "Hello, world!", 10)).await?;
    if !response.is_ok() {
        return Ok(unexpected_status(&response));
    }

    let out = response.json()?;
    Ok(check_usage(&out["usage"]))
}

fn check_usage(usage: &Value) -> ProbeOutcome {
    match usage_violation(usage) {
        Ok(()) => ProbeOutcome::Passed,
        Err(failure) => failure,
    }
}

fn usage_violation(usage: &Value) -> Result<(), ProbeOutcome> {
    let prompt = usage_field(usage, "prompt_tokens")?;
    let completion = usage_field(usage, "completion_tokens")?;
    let total = usage_field(usage, "total_tokens")?;

    if prompt <= 0 {
        return Err(ProbeOutcome::failed("prompt_tokens should be > 0"));
    }
    if completion <= 0 {
        return Err(ProbeOutcome::failed("completion_tokens should be > 0"));
    }
    let expected = prompt + completion;
    if total != expected {
        return Err(ProbeOutcome::failed(format!(
            "total_tokens should equal prompt + completion tokens: expected {}, got {}",
            expected, total
        )));
    }
    Ok(())
}

fn usage_field(usage: &Value, name: &str) -> Result<i64, ProbeOutcome> {
    let value = usage
        .get(name)
        .ok_or_else(|| ProbeOutcome::failed(format!("Missing {} in usage", name)))?;
    as_integer(value)
        .ok_or_else(|| ProbeOutcome::failed(format!("{} is not an integer: {}", name, value)))
}

/// Integer value of a JSON number. Integral floats such as `5.0` count.
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}
