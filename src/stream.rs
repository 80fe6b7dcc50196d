//! Validation of `text/event-stream` bodies returned by streaming completions.
//!
//! Each `data: ` line must carry a JSON chunk, and the stream must be closed by a
//! `data: [DONE]` line. Validation is fail-fast: the first malformed payload stops
//! all further counting.

use crate::runner::ProbeOutcome;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// What a validator saw over a whole stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub chunk_count: usize,
    pub terminal_seen: bool,
    pub parse_error: Option<String>,
}

impl StreamSummary {
    /// Classify the stream for a probe: well-formed streams pass, anything else fails.
    pub fn verdict(&self) -> ProbeOutcome {
        if let Some(error) = &self.parse_error {
            return ProbeOutcome::Failed(error.clone());
        }
        if self.chunk_count == 0 {
            return ProbeOutcome::Failed("No streaming chunks received".into());
        }
        if !self.terminal_seen {
            return ProbeOutcome::Failed("Stream did not end with [DONE]".into());
        }
        ProbeOutcome::Passed
    }
}

/// Incremental validator fed one body line at a time.
#[derive(Debug, Default)]
pub struct StreamValidator {
    summary: StreamSummary,
}

impl StreamValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a single line. Returns `false` once validation has stopped on a parse error,
    /// after which callers may stop reading.
    pub fn feed(&mut self, line: &str) -> bool {
        if self.summary.parse_error.is_some() {
            return false;
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return true;
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            // event:, id:, retry: and ':' comment lines carry no chunk
            return true;
        };

        let payload = payload.trim();
        if payload == DONE_MARKER {
            self.summary.terminal_seen = true;
            return true;
        }

        match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(_) => {
                self.summary.chunk_count += 1;
                true
            }
            Err(_) => {
                self.summary.parse_error = Some(format!("Invalid JSON in stream: {}", payload));
                false
            }
        }
    }

    pub fn finish(self) -> StreamSummary {
        self.summary
    }
}

/// Validate a complete sequence of body lines.
pub fn validate_lines<I, S>(lines: I) -> StreamSummary
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut validator = StreamValidator::new();
    for line in lines {
        if !validator.feed(line.as_ref()) {
            break;
        }
    }
    validator.finish()
}
