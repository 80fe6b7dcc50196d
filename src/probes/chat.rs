use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use super::{
    CHAT_COMPLETIONS_PATH, check_model_and_single_choice, check_stream, choices, first_choice,
    unexpected_status, unexpected_status_with_body,
};
use crate::client::ApiResponse;
use crate::runner::{ProbeContext, ProbeOutcome};

/// Fact planted early in the multi-turn conversation and expected back in the answer.
const REMEMBERED_NAME: &str = "Alice";

fn request(ctx: &ProbeContext, messages: Value) -> Value {
    json!({
        "model": ctx.model,
        "messages": messages,
        "temperature": 0,
        "max_tokens": 32,
    })
}

async fn post(ctx: &ProbeContext, body: &Value) -> Result<ApiResponse> {
    ctx.transport
        .post_json(CHAT_COMPLETIONS_PATH, body, ctx.timeouts.generation())
        .await
}

pub async fn basic(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let messages = json!([{"role": "user", "content": "Say hello in exactly 5 words."}]);
    let response = post(&ctx, &request(&ctx, messages)).await?;
    if !response.is_ok() {
        return Ok(unexpected_status_with_body(&response));
    }

    let out = response.json()?;
    if let Some(failure) = check_model_and_single_choice(&ctx, &out) {
        return Ok(failure);
    }

    let Some(message) = choices(&out)[0].get("message") else {
        return Ok(ProbeOutcome::failed("Choice missing 'message' field"));
    };
    if message.get("content").is_none() {
        return Ok(ProbeOutcome::failed("Message missing 'content' field"));
    }
    Ok(ProbeOutcome::Passed)
}

/// The one semantic probe: the answer must recall a name given two turns earlier.
pub async fn multi_turn(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let messages = json!([
        {"role": "user", "content": format!("My name is {}.", REMEMBERED_NAME)},
        {"role": "assistant", "content": format!("Hello {}! Nice to meet you.", REMEMBERED_NAME)},
        {"role": "user", "content": "What is my name?"}
    ]);
    let response = post(&ctx, &request(&ctx, messages)).await?;
    if !response.is_ok() {
        return Ok(unexpected_status(&response));
    }

    let out = response.json()?;
    let content = first_choice(&out)?
        .pointer("/message/content")
        .and_then(Value::as_str)
        .context("first choice has no message content")?
        .to_lowercase();

    if !content.contains(&REMEMBERED_NAME.to_lowercase()) {
        return Ok(ProbeOutcome::failed(format!(
            "Expected model to remember '{}', got: {}",
            REMEMBERED_NAME, content
        )));
    }
    Ok(ProbeOutcome::Passed)
}

pub async fn streaming(ctx: Arc<ProbeContext>) -> Result<ProbeOutcome> {
    let messages = json!([{"role": "user", "content": "Count from 1 to 5."}]);
    let mut body = request(&ctx, messages);
    body["stream"] = json!(true);
    check_stream(&ctx, CHAT_COMPLETIONS_PATH, &body).await
}
