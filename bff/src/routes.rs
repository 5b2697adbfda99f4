//! HTTP routes.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bff_core::{
    Backend, Message, PreflightError, RelayEvent, Submission, ValidationError, Verdict,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Events buffered between a relay session and the HTTP response body.
const SSE_BUFFER: usize = 16;

#[derive(Clone)]
pub struct AppState {
    backend: Arc<Backend>,
}

pub fn router(backend: Arc<Backend>) -> Router {
    Router::new()
        .route("/messages", get(list_messages).post(post_message))
        .route(
            "/lemmatized-keywords",
            get(list_keywords).post(post_keywords),
        )
        .route("/char-limit", get(get_char_limit).post(post_char_limit))
        .route("/ask-chatgpt", get(ask_chatgpt))
        .with_state(AppState { backend })
}

// ============================================================================
// Errors
// ============================================================================

/// A JSON error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl From<PreflightError> for ApiError {
    fn from(e: PreflightError) -> Self {
        let status = match e {
            PreflightError::NotFound(_) => StatusCode::NOT_FOUND,
            PreflightError::NotOwner | PreflightError::Flagged => StatusCode::FORBIDDEN,
        };
        Self::new(status, e.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageResponse {
    pub message_id: String,
    pub message: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedMessageResponse {
    pub error: String,
    pub message_id: String,
    pub found_keywords: Vec<String>,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    pub user_id: Option<String>,
}

async fn post_message(
    State(state): State<AppState>,
    payload: Result<Json<PostMessageRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload.map_err(|_| ApiError::bad_request("Invalid JSON"))?;

    let verdict = state
        .backend
        .submit(Submission::new(request.user_id, request.message))?;

    let response = match verdict {
        Verdict::Approved { message_id } => Json(PostMessageResponse {
            message_id: message_id.to_string(),
            message: "Message posted successfully",
            status: "approved",
        })
        .into_response(),
        Verdict::Flagged {
            message_id,
            matched_terms,
        } => (
            StatusCode::BAD_REQUEST,
            Json(FlaggedMessageResponse {
                error: PreflightError::Flagged.to_string(),
                message_id: message_id.to_string(),
                found_keywords: matched_terms,
                message: "Your message has been saved but contains prohibited content",
            }),
        )
            .into_response(),
    };
    Ok(response)
}

async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Json<Vec<Message>> {
    let ledger = state.backend.ledger();
    match query.user_id.as_deref() {
        Some(user_id) if !user_id.is_empty() => Json(ledger.get_by_user(user_id)),
        _ => Json(ledger.get_all()),
    }
}

// ============================================================================
// Keywords
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct KeywordRequest {
    pub keywords: Vec<String>,
}

async fn post_keywords(
    State(state): State<AppState>,
    payload: Result<Json<KeywordRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(request) = payload.map_err(|_| {
        ApiError::bad_request(r#"Invalid JSON. Expected { "keywords": ["word1", "word2"] }"#)
    })?;
    if request.keywords.is_empty() {
        return Err(ApiError::bad_request(
            "The 'keywords' array cannot be empty.",
        ));
    }

    let count = request.keywords.len();
    let added = state.backend.keywords().add(&request.keywords);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Lemmatized keywords added",
            "count": count,
            "added": added,
        })),
    ))
}

async fn list_keywords(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.backend.keywords().keywords())
}

// ============================================================================
// Character limit
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharLimit {
    pub char_limit: usize,
}

async fn get_char_limit(State(state): State<AppState>) -> Json<CharLimit> {
    Json(CharLimit {
        char_limit: state.backend.gate().char_limit(),
    })
}

async fn post_char_limit(
    State(state): State<AppState>,
    payload: Result<Json<CharLimit>, JsonRejection>,
) -> ApiResult<Json<CharLimit>> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let gate = state.backend.gate();
    gate.set_char_limit(request.char_limit)?;
    Ok(Json(CharLimit {
        char_limit: gate.char_limit(),
    }))
}

// ============================================================================
// Streaming
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub user_id: Option<String>,
    pub message_id: Option<String>,
}

async fn ask_chatgpt(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let user_id = query
        .user_id
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request("userId parameter is required"))?;
    let message_id = query
        .message_id
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request("messageId parameter is required"))?;

    let session = state.backend.open_stream(&user_id, &message_id)?;

    // Dropping the response body drops `rx`, which ends the session.
    let (tx, rx) = mpsc::channel(SSE_BUFFER);
    tokio::spawn(session.run(tx));

    let events = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(sse_event(&event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Render a relay event as an SSE frame.
///
/// SSE field values may not contain carriage returns, so CRLF and lone CR
/// line breaks become LF. Each line is then sent as its own `data:` field.
fn sse_event(event: &RelayEvent) -> Event {
    let data = event.payload().replace("\r\n", "\n").replace('\r', "\n");
    Event::default().event(event.name()).data(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bff_core::{ScriptStep, ScriptedProvider, UpstreamError};
    use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};

    struct TestServer {
        base: String,
        provider: Arc<ScriptedProvider>,
        client: reqwest::Client,
    }

    impl TestServer {
        async fn start(provider: ScriptedProvider) -> Self {
            let provider = Arc::new(provider);
            let backend = Arc::new(Backend::new(provider.clone(), 500).unwrap());
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, router(backend)).await.unwrap();
            });
            Self {
                base: format!("http://{addr}"),
                provider,
                client: reqwest::Client::new(),
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }

        async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
            let response = self.client.post(self.url(path)).json(&body).send().await.unwrap();
            let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
            (status, response.json().await.unwrap())
        }

        async fn get(&self, path: &str) -> (StatusCode, Value) {
            let response = self.client.get(self.url(path)).send().await.unwrap();
            let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
            (status, response.json().await.unwrap())
        }

        async fn submit(&self, user: &str, message: &str) -> String {
            let (_, body) = self
                .post("/messages", json!({ "userId": user, "message": message }))
                .await;
            body["messageId"].as_str().unwrap().to_string()
        }
    }

    /// Parse an SSE body into (event, data) pairs.
    fn parse_sse(body: &str) -> Vec<(String, String)> {
        body.split("\n\n")
            .filter_map(|frame| {
                let mut name = None;
                let mut data = Vec::new();
                for line in frame.lines() {
                    if let Some(v) = line.strip_prefix("event:") {
                        name = Some(v.trim_start().to_string());
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data.push(v.strip_prefix(' ').unwrap_or(v).to_string());
                    }
                }
                name.map(|n| (n, data.join("\n")))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_post_message_approved() {
        let server = TestServer::start(ScriptedProvider::chunks(&[])).await;

        let (status, body) = server
            .post("/messages", json!({ "userId": "u1", "message": "hello" }))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "approved");
        assert_eq!(body["message"], "Message posted successfully");
        assert!(body["messageId"].as_str().unwrap().starts_with("msg_"));
    }

    #[tokio::test]
    async fn test_post_message_flagged() {
        let server = TestServer::start(ScriptedProvider::chunks(&[])).await;
        let (status, _) = server
            .post("/lemmatized-keywords", json!({ "keywords": ["running"] }))
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = server
            .post("/messages", json!({ "userId": "u1", "message": "I love running" }))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message contains forbidden keywords");
        assert_eq!(body["foundKeywords"], json!(["run"]));

        let (_, messages) = server.get("/messages").await;
        assert_eq!(messages[0]["flagged"], true);
        assert_eq!(messages[0]["id"], body["messageId"]);
    }

    #[tokio::test]
    async fn test_post_message_validation() {
        let server = TestServer::start(ScriptedProvider::chunks(&[])).await;

        let (status, body) = server
            .post("/messages", json!({ "userId": "u1", "message": "" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message cannot be empty");

        let (status, body) = server.post("/messages", json!({ "message": "hi" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "UserId cannot be empty");

        let response = server
            .client
            .post(server.url("/messages"))
            .header(CONTENT_TYPE, "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);

        let (_, messages) = server.get("/messages").await;
        assert_eq!(messages, json!([]));
    }

    #[tokio::test]
    async fn test_list_messages_by_user() {
        let server = TestServer::start(ScriptedProvider::chunks(&[])).await;
        server.submit("u1", "one").await;
        server.submit("u2", "two").await;

        let (_, all) = server.get("/messages").await;
        assert_eq!(all.as_array().unwrap().len(), 2);

        let (_, mine) = server.get("/messages?userId=u2").await;
        assert_eq!(mine.as_array().unwrap().len(), 1);
        assert_eq!(mine[0]["content"], "two");
    }

    #[tokio::test]
    async fn test_keywords_endpoints() {
        let server = TestServer::start(ScriptedProvider::chunks(&[])).await;

        let (status, body) = server
            .post("/lemmatized-keywords", json!({ "keywords": ["cats", "Running", "runs"] }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["count"], 3);
        assert_eq!(body["added"], 2);

        let (_, keywords) = server.get("/lemmatized-keywords").await;
        assert_eq!(keywords, json!(["cat", "run"]));

        let (status, body) = server
            .post("/lemmatized-keywords", json!({ "keywords": [] }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "The 'keywords' array cannot be empty.");
    }

    #[tokio::test]
    async fn test_char_limit_endpoints() {
        let server = TestServer::start(ScriptedProvider::chunks(&[])).await;

        let (_, body) = server.get("/char-limit").await;
        assert_eq!(body["charLimit"], 500);

        let (status, body) = server.post("/char-limit", json!({ "charLimit": 5 })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["charLimit"], 5);

        let (status, body) = server
            .post("/messages", json!({ "userId": "u1", "message": "too long" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid Character Size"));

        let (status, _) = server.post("/char-limit", json!({ "charLimit": 0 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stream_requires_params() {
        let server = TestServer::start(ScriptedProvider::chunks(&[])).await;

        let (status, body) = server.get("/ask-chatgpt?messageId=msg_1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "userId parameter is required");

        let (status, body) = server.get("/ask-chatgpt?userId=u1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "messageId parameter is required");
    }

    #[tokio::test]
    async fn test_stream_preflight_statuses() {
        let server = TestServer::start(ScriptedProvider::chunks(&["x"])).await;
        let (status, _) = server
            .post("/lemmatized-keywords", json!({ "keywords": ["secret"] }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let clean = server.submit("u1", "hello").await;
        let flagged = server.submit("u1", "a secret").await;

        let (status, _) = server.get("/ask-chatgpt?userId=u1&messageId=msg_0").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = server
            .get(&format!("/ask-chatgpt?userId=u2&messageId={clean}"))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Message does not belong to the specified user");

        let (status, body) = server
            .get(&format!("/ask-chatgpt?userId=u1&messageId={flagged}"))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Message contains forbidden keywords");

        assert_eq!(server.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_stream_relays_events() {
        let server = TestServer::start(ScriptedProvider::chunks(&["Hel", "lo"])).await;
        let id = server.submit("u1", "greet me").await;

        let response = server
            .client
            .get(server.url(&format!("/ask-chatgpt?userId=u1&messageId={id}")))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");

        let events = parse_sse(&response.text().await.unwrap());
        let expected: Vec<(String, String)> = [
            ("connection", "Connected to completion stream"),
            ("data", "Hel"),
            ("data", "lo"),
            ("done", "Stream completed"),
        ]
        .iter()
        .map(|(n, d)| (n.to_string(), d.to_string()))
        .collect();
        assert_eq!(events, expected);
        assert_eq!(server.provider.contents(), vec!["greet me"]);
    }

    #[tokio::test]
    async fn test_stream_reports_upstream_error() {
        let provider = ScriptedProvider::new(vec![
            ScriptStep::Delta("partial".into()),
            ScriptStep::Fail(UpstreamError::Transport("connection reset".into())),
        ]);
        let server = TestServer::start(provider).await;
        let id = server.submit("u1", "hi").await;

        let body = server
            .client
            .get(server.url(&format!("/ask-chatgpt?userId=u1&messageId={id}")))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        let events = parse_sse(&body);
        let last = events.last().unwrap();
        assert_eq!(last.0, "error");
        assert_eq!(last.1, "Error: error reading stream: connection reset");
        assert!(!events.iter().any(|(name, _)| name == "done"));
    }

    #[tokio::test]
    async fn test_stream_fragment_with_carriage_returns() {
        let provider = ScriptedProvider::chunks(&["line one\r\nline two", "\r"]);
        let server = TestServer::start(provider).await;
        let id = server.submit("u1", "hi").await;

        let body = server
            .client
            .get(server.url(&format!("/ask-chatgpt?userId=u1&messageId={id}")))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        let events = parse_sse(&body);
        assert_eq!(events[1], ("data".to_string(), "line one\nline two".to_string()));
        assert_eq!(events[2], ("data".to_string(), "\n".to_string()));
        assert_eq!(
            events.last().unwrap(),
            &("done".to_string(), "Stream completed".to_string())
        );
    }

    #[tokio::test]
    async fn test_stream_error_body_with_crlf() {
        let server = TestServer::start(ScriptedProvider::failing(UpstreamError::Status {
            status: 502,
            body: "<html>\r\n<body>Bad Gateway</body>\r\n</html>".into(),
        }))
        .await;
        let id = server.submit("u1", "hi").await;

        let body = server
            .client
            .get(server.url(&format!("/ask-chatgpt?userId=u1&messageId={id}")))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        let events = parse_sse(&body);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            (
                "error".to_string(),
                "Error: completion API error: 502 - <html>\n<body>Bad Gateway</body>\n</html>"
                    .to_string()
            )
        );
    }
}
