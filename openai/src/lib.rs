//! Minimal OpenAI Chat Completions client.
//!
//! This crate provides a focused client for OpenAI-compatible APIs with:
//! - Streaming chat completions
//! - Incremental SSE parsing that tolerates frames split across reads
//! - API key validation against the models endpoint

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;

const API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Marker that opens an SSE data line.
const DATA_PREFIX: &str = "data:";
/// Payload of the frame that ends a completion stream.
const DONE_SENTINEL: &str = "[DONE]";

/// Errors that can occur when using the OpenAI client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Network(e.to_string())
        }
    }
}

/// A boxed stream of parsed completion events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>;

/// OpenAI API client.
#[derive(Clone)]
pub struct OpenAi {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAi")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl OpenAi {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a client from the OPENAI_API_KEY environment variable.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| Error::NoApiKey)?;
        if api_key.trim().is_empty() {
            return Err(Error::NoApiKey);
        }
        Ok(Self::new(api_key))
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the overall timeout applied to every request, body included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The overall per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a chat request and stream the response.
    ///
    /// A non-success status is returned as [`Error::Api`] carrying the full
    /// response body. On success the body is parsed incrementally; malformed
    /// frames are skipped and a transport failure ends the stream with one
    /// error item.
    pub async fn stream(&self, request: ChatRequest) -> Result<EventStream, Error> {
        let api_request = self.build_api_request(&request, true);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(headers)
            .timeout(self.timeout)
            .json(&api_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(Error::Api {
                status,
                message: error_body(response).await,
            });
        }

        Ok(Box::pin(sse_events(response.bytes_stream())))
    }

    /// Check that the configured key is accepted by the API.
    pub async fn validate_api_key(&self) -> Result<(), Error> {
        let headers = self.build_headers()?;

        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .headers(headers)
            .timeout(self.timeout)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(Error::Api {
                status: StatusCode::UNAUTHORIZED.as_u16(),
                message: "invalid API key".to_string(),
            }),
            status => Err(Error::Api {
                status: status.as_u16(),
                message: error_body(response).await,
            }),
        }
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    fn build_api_request<'a>(&'a self, request: &'a ChatRequest, stream: bool) -> ApiRequest<'a> {
        ApiRequest {
            model: request.model.as_deref().unwrap_or(&self.model),
            messages: &request.messages,
            temperature: request.temperature,
            stream,
        }
    }
}

/// Read the body of a failed response, or a note saying why it could not be read.
async fn error_body(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "failed to read error response body");
            format!("<unreadable response body: {e}>")
        }
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// Create a new request with the given messages.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            model: None,
            messages,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Events from a streaming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental text fragment. May be empty for role-only deltas.
    Delta { text: String },
    /// The sentinel frame; no further content follows.
    Done,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ApiStreamChunk {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    delta: ApiDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ApiDelta {
    #[serde(default)]
    content: Option<String>,
}

// ============================================================================
// SSE parsing
// ============================================================================

struct SseState<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<StreamEvent, Error>>,
    exhausted: bool,
}

/// Turn a raw byte stream into completion events.
///
/// Bytes are buffered until a full line is available, so frames and
/// multi-byte characters may be split across reads. A read error is yielded
/// once and ends the stream.
pub fn sse_events<S, B, E>(bytes: S) -> impl Stream<Item = Result<StreamEvent, Error>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Send + 'static,
    Error: From<E>,
{
    let state = SseState {
        inner: Box::pin(bytes),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.exhausted {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    drain_complete_lines(&mut state.buffer, &mut state.pending);
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(Error::from(e)));
                    state.exhausted = true;
                }
                None => {
                    // An unterminated last line is still a line.
                    let rest = std::mem::take(&mut state.buffer);
                    if let Some(event) = parse_sse_line(&rest) {
                        state.pending.push_back(Ok(event));
                    }
                    state.exhausted = true;
                }
            }
        }
    })
}

/// Parse every complete line in `buffer`, leaving any partial line behind.
fn drain_complete_lines(buffer: &mut Vec<u8>, out: &mut VecDeque<Result<StreamEvent, Error>>) {
    let mut start = 0;
    while let Some(offset) = buffer[start..].iter().position(|&b| b == b'\n') {
        let end = start + offset;
        if let Some(event) = parse_sse_line(&buffer[start..end]) {
            out.push_back(Ok(event));
        }
        start = end + 1;
    }
    buffer.drain(..start);
}

/// Parse one SSE line. Returns `None` for anything that is not a usable data frame.
fn parse_sse_line(raw: &[u8]) -> Option<StreamEvent> {
    let decoded = String::from_utf8_lossy(raw);
    let line = decoded.strip_suffix('\r').unwrap_or(&*decoded);

    // event:, id:, retry:, comments and blank separators carry nothing we use
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_str::<ApiStreamChunk>(payload) {
        Ok(chunk) => {
            let text = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .unwrap_or_default();
            Some(StreamEvent::Delta { text })
        }
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed SSE frame");
            None
        }
    }
}
