//! The probes run against an OpenAI-compatible server, and the order they run in.
//!
//! Every probe checks response *shape* and status codes. The one semantic check is
//! `chat_completions_multi_turn`, which smoke-tests conversational memory.

pub mod chat;
pub mod completions;
pub mod endpoints;

use anyhow::{Context, Result};
use futures_util::{FutureExt, StreamExt};
use serde_json::Value;

use crate::client::ApiResponse;
use crate::runner::{ProbeContext, ProbeOutcome, TestCase};
use crate::stream::StreamValidator;

pub const COMPLETIONS_PATH: &str = "/v1/completions";
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// The full suite, in execution order.
pub fn registry() -> Vec<TestCase> {
    vec![
        TestCase::new("models_endpoint", |ctx| endpoints::models_endpoint(ctx).boxed()),
        TestCase::new("health_endpoint", |ctx| endpoints::health_endpoint(ctx).boxed()),
        TestCase::new("completions_basic", |ctx| completions::basic(ctx).boxed()),
        TestCase::new("completions_with_logprobs", |ctx| {
            completions::with_logprobs(ctx).boxed()
        }),
        TestCase::new("completions_streaming", |ctx| completions::streaming(ctx).boxed()),
        TestCase::new("chat_completions_basic", |ctx| chat::basic(ctx).boxed()),
        TestCase::new("chat_completions_multi_turn", |ctx| chat::multi_turn(ctx).boxed()),
        TestCase::new("chat_completions_streaming", |ctx| chat::streaming(ctx).boxed()),
        TestCase::new("completions_stop_words", |ctx| completions::stop_words(ctx).boxed()),
        TestCase::new("completions_max_tokens", |ctx| completions::max_tokens(ctx).boxed()),
        TestCase::new("completions_temperature", |ctx| completions::temperature(ctx).boxed()),
        TestCase::new("usage_stats", |ctx| completions::usage_stats(ctx).boxed()),
        TestCase::new("metrics_endpoint", |ctx| endpoints::metrics_endpoint(ctx).boxed()),
        TestCase::new("invalid_model", |ctx| endpoints::invalid_model(ctx).boxed()),
        TestCase::new("empty_prompt", |ctx| endpoints::empty_prompt(ctx).boxed()),
    ]
}

fn unexpected_status(response: &ApiResponse) -> ProbeOutcome {
    ProbeOutcome::failed(format!("Expected status 200, got {}", response.status))
}

/// Like [`unexpected_status`], quoting the body so the server's error is visible.
fn unexpected_status_with_body(response: &ApiResponse) -> ProbeOutcome {
    ProbeOutcome::failed(format!(
        "Expected status 200, got {}: {}",
        response.status, response.body
    ))
}

/// `choices` as a slice; absent or non-array counts as empty.
fn choices(out: &Value) -> &[Value] {
    out.get("choices")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn first_choice(out: &Value) -> Result<&Value> {
    choices(out).first().context("response has no choices")
}

fn first_choice_text(out: &Value) -> Result<&str> {
    first_choice(out)?
        .get("text")
        .and_then(Value::as_str)
        .context("first choice has no 'text' string")
}

/// Render a JSON field for a failure message, without quoting strings twice.
fn display_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "None".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Shared shape checks for a non-streaming generation response: echoed model and a
/// single choice.
fn check_model_and_single_choice(ctx: &ProbeContext, out: &Value) -> Option<ProbeOutcome> {
    let echoed = out.get("model");
    if echoed.and_then(Value::as_str) != Some(ctx.model.as_str()) {
        return Some(ProbeOutcome::failed(format!(
            "Expected model '{}', got '{}'",
            ctx.model,
            display_field(echoed)
        )));
    }

    let count = choices(out).len();
    if count != 1 {
        return Some(ProbeOutcome::failed(format!("Expected 1 choice, got {}", count)));
    }
    None
}

/// POST a streaming request and validate the event stream it returns.
async fn check_stream(ctx: &ProbeContext, path: &str, body: &Value) -> Result<ProbeOutcome> {
    let mut response = ctx
        .transport
        .post_stream(path, body, ctx.timeouts.generation())
        .await?;
    if response.status != 200 {
        return Ok(ProbeOutcome::failed(format!(
            "Expected status 200, got {}",
            response.status
        )));
    }

    let mut validator = StreamValidator::new();
    while let Some(line) = response.lines.next().await {
        if !validator.feed(&line?) {
            break;
        }
    }
    Ok(validator.finish().verdict())
}


#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::testing::{MODEL, context};
    use super::*;
    use crate::client::testing::{Reply, ScriptedTransport};

    #[test]
    fn registry_names_are_unique_and_ordered() {
        let names: Vec<&str> = registry().iter().map(|c| c.name).collect();
        assert_eq!(names.len(), 15);
        assert_eq!(names.first(), Some(&"models_endpoint"));
        assert_eq!(names.last(), Some(&"empty_prompt"));
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), names.len());
    }

    #[test]
    fn model_echo_and_choice_count() {
        let (_, ctx) = context(ScriptedTransport::new());
        let ok = json!({"model": MODEL, "choices": [{}]});
        assert_eq!(check_model_and_single_choice(&ctx, &ok), None);

        let wrong = json!({"model": "other", "choices": [{}]});
        assert_eq!(
            check_model_and_single_choice(&ctx, &wrong),
            Some(ProbeOutcome::failed("Expected model 'test-model', got 'other'"))
        );

        let missing = json!({"choices": [{}]});
        assert_eq!(
            check_model_and_single_choice(&ctx, &missing),
            Some(ProbeOutcome::failed("Expected model 'test-model', got 'None'"))
        );

        let two = json!({"model": MODEL, "choices": [{}, {}]});
        assert_eq!(
            check_model_and_single_choice(&ctx, &two),
            Some(ProbeOutcome::failed("Expected 1 choice, got 2"))
        );
    }

    #[tokio::test]
    async fn stream_requires_ok_status_first() {
        let transport = ScriptedTransport::new().on(
            COMPLETIONS_PATH,
            Reply::Stream(500, vec!["data: [DONE]".into()]),
        );
        let (_, ctx) = context(transport);
        let outcome = check_stream(&ctx, COMPLETIONS_PATH, &json!({})).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::failed("Expected status 200, got 500"));
    }
}
