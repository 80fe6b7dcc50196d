use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

/// Lines of a streaming response body, without their line terminators.
pub type LineStream = BoxStream<'static, Result<String>>;

/// A fully-read response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn json(&self) -> Result<Value> {
        serde_json::from_str(&self.body)
            .with_context(|| format!("response body is not valid JSON: {}", preview(&self.body)))
    }
}

/// A response whose body is consumed line by line as it arrives.
pub struct StreamingResponse {
    pub status: u16,
    pub lines: LineStream,
}

/// HTTP seam between the harness and the server under test.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Base address every path is resolved against, e.g. `http://localhost:8000`.
    fn base_url(&self) -> &str;

    async fn get(&self, path: &str, timeout: Duration) -> Result<ApiResponse>;

    async fn post_json(&self, path: &str, body: &Value, timeout: Duration) -> Result<ApiResponse>;

    /// POST and hand back the body as a line stream. The timeout bounds the whole
    /// exchange, including reading the stream to its end.
    async fn post_stream(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<StreamingResponse>;
}

/// reqwest-backed transport with the shared JSON headers installed as defaults.
pub struct HttpClient {
    base_url: String,
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(
        base_url: impl Into<String>,
        extra_headers: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name '{}'", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header '{}'", name))?;
            headers.insert(name, value);
        }

        let inner = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            inner,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read(&self, request: reqwest::RequestBuilder, url: &str) -> Result<ApiResponse> {
        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read response body from {}", url))?;
        Ok(ApiResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str, timeout: Duration) -> Result<ApiResponse> {
        let url = self.url(path);
        self.read(self.inner.get(&url).timeout(timeout), &url).await
    }

    async fn post_json(&self, path: &str, body: &Value, timeout: Duration) -> Result<ApiResponse> {
        let url = self.url(path);
        let request = self.inner.post(&url).json(body).timeout(timeout);
        self.read(request, &url).await
    }

    async fn post_stream(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<StreamingResponse> {
        let url = self.url(path);
        let response = self
            .inner
            .post(&url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        let status = response.status().as_u16();
        Ok(StreamingResponse {
            status,
            lines: split_lines(response.bytes_stream().boxed()),
        })
    }
}

/// Re-chunk a byte stream on `\n`, carrying partial lines across chunk boundaries.
fn split_lines<B, E>(bytes: BoxStream<'static, std::result::Result<B, E>>) -> LineStream
where
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = (bytes, Vec::<u8>::new(), false);
    futures_util::stream::unfold(state, |(mut bytes, mut buf, mut done)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                return Some((Ok(decode_line(&line)), (bytes, buf, done)));
            }
            if done {
                if buf.is_empty() {
                    return None;
                }
                let line = decode_line(&buf);
                return Some((Ok(line), (bytes, Vec::new(), true)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    let err = anyhow::Error::new(e).context("failed to read streaming body");
                    return Some((Err(err), (bytes, Vec::new(), true)));
                }
                None => done = true,
            }
        }
    })
    .boxed()
}

fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}

fn preview(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
