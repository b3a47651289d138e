//! Chat relay to the upstream workflow execution API.
//!
//! The upstream answers either with one JSON document or with a stream of
//! `data: {json}` lines carrying `stream_start`, `stream_chunk` and a final
//! `workflow_finished` event.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Value, json};
use tokio::sync::{Semaphore, mpsc};
use url::Url;

use agentdesk_core::chat::StreamFrame;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("upstream did not answer within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("upstream finished without an answer")]
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub message: String,
    /// Empty starts a new upstream conversation
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAnswer {
    pub answer: String,
    /// Set when the upstream handed out a conversation id
    pub conversation_id: Option<String>,
}

/// Seam between the HTTP handlers and the upstream workflow API.
#[async_trait]
pub trait ChatRelay: Send + Sync {
    /// Relay one message. Start and chunk frames go to `progress` as they
    /// arrive; the terminal outcome is the return value.
    async fn send(
        &self,
        request: RelayRequest,
        progress: Option<mpsc::Sender<StreamFrame>>,
    ) -> Result<RelayAnswer, RelayError>;
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub upstream_url: Url,
    /// Sent verbatim as the `Authorization` header when non-empty
    pub token: String,
    pub app_id: i64,
    pub timeout: Duration,
    pub input_params: Value,
    pub files: Value,
    pub max_concurrency: usize,
    pub insecure_tls: bool,
}

/// reqwest-backed relay. Concurrent upstream calls are bounded by a
/// semaphore; each call has one total timeout and no retry.
pub struct WorkflowRelay {
    client: reqwest::Client,
    config: RelayConfig,
    permits: Arc<Semaphore>,
}

impl WorkflowRelay {
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()
            .map_err(|e| RelayError::Upstream(format!("failed to build HTTP client: {e}")))?;
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Ok(Self {
            client,
            config,
            permits,
        })
    }

    fn payload(&self, request: &RelayRequest) -> Value {
        json!({
            "appId": self.config.app_id,
            "inputParams": self.config.input_params,
            "query": request.message,
            "conversationId": request.conversation_id,
            "files": self.config.files,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> RelayError {
        if err.is_timeout() {
            RelayError::Timeout(self.config.timeout)
        } else {
            RelayError::Upstream(err.to_string())
        }
    }
}

#[async_trait]
impl ChatRelay for WorkflowRelay {
    async fn send(
        &self,
        request: RelayRequest,
        progress: Option<mpsc::Sender<StreamFrame>>,
    ) -> Result<RelayAnswer, RelayError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RelayError::Upstream("relay is shutting down".to_string()))?;

        tracing::debug!(
            conversation_id = %request.conversation_id,
            chars = request.message.chars().count(),
            "Relaying message upstream"
        );

        let mut builder = self
            .client
            .post(self.config.upstream_url.clone())
            .json(&self.payload(&request));
        if !self.config.token.is_empty() {
            builder = builder.header(AUTHORIZATION, &self.config.token);
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(RelayError::Upstream(format!(
                "upstream returned {status}: {snippet}"
            )));
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        if is_json {
            let body: Value = response.json().await.map_err(|e| self.transport_error(e))?;
            return final_answer(&body).ok_or(RelayError::Incomplete);
        }

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| match e {
                EventStreamError::Transport(err) => self.transport_error(err),
                other => RelayError::Upstream(format!("malformed event stream: {other}")),
            })?;
            let Some(frame) = decode_data(&event.data) else {
                continue;
            };
            if let Some(answer) = dispatch(frame, progress.as_ref()).await {
                return answer;
            }
        }

        Err(RelayError::Incomplete)
    }
}

/// Forward progress events; return the outcome once the final event shows up.
async fn dispatch(
    frame: Value,
    progress: Option<&mpsc::Sender<StreamFrame>>,
) -> Option<Result<RelayAnswer, RelayError>> {
    match WorkflowEvent::from_frame(&frame) {
        WorkflowEvent::Started => {
            notify(progress, StreamFrame::Start {
                message: "Receiving answer...".to_string(),
            })
            .await;
            None
        }
        WorkflowEvent::Chunk(chunk) => {
            notify(progress, StreamFrame::Chunk { chunk }).await;
            None
        }
        WorkflowEvent::Finished(answer) => Some(Ok(answer)),
        WorkflowEvent::Other => None,
    }
}

async fn notify(progress: Option<&mpsc::Sender<StreamFrame>>, frame: StreamFrame) {
    if let Some(tx) = progress {
        // The receiver goes away when the client disconnects; the upstream
        // call still runs to completion.
        let _ = tx.send(frame).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WorkflowEvent {
    Started,
    Chunk(String),
    Finished(RelayAnswer),
    Other,
}

impl WorkflowEvent {
    fn from_frame(frame: &Value) -> Self {
        match frame.get("event").and_then(Value::as_str) {
            Some("stream_start") => WorkflowEvent::Started,
            Some("stream_chunk") => match frame.pointer("/data/chunk").and_then(Value::as_str) {
                Some(chunk) if !chunk.is_empty() => WorkflowEvent::Chunk(chunk.to_string()),
                _ => WorkflowEvent::Other,
            },
            // A finished workflow without an answer still completes the turn.
            Some("workflow_finished") => WorkflowEvent::Finished(RelayAnswer {
                answer: frame
                    .pointer("/data/outputs/answer")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                conversation_id: conversation_id_of(frame),
            }),
            _ => WorkflowEvent::Other,
        }
    }
}

/// Answer and conversation id of a plain JSON reply. A top-level `answer`
/// is accepted as well.
fn final_answer(body: &Value) -> Option<RelayAnswer> {
    let answer = body
        .pointer("/data/outputs/answer")
        .or_else(|| body.get("answer"))
        .and_then(Value::as_str)?;
    Some(RelayAnswer {
        answer: answer.to_string(),
        conversation_id: conversation_id_of(body),
    })
}

fn conversation_id_of(body: &Value) -> Option<String> {
    body.get("conversationId")
        .or_else(|| body.get("conversation_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Parse the `data` of one upstream event. Malformed payloads are logged and
/// skipped.
fn decode_data(data: &str) -> Option<Value> {
    let payload = data.trim();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            let snippet: String = payload.chars().take(120).collect();
            tracing::warn!(error = %e, frame = %snippet, "Skipping malformed upstream frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::header;
    use axum::routing::post;

    #[test]
    fn event_data_is_decoded_or_skipped() {
        assert_eq!(decode_data(" {\"ok\":true} "), Some(json!({"ok": true})));
        assert_eq!(decode_data("{not json}"), None);
        assert_eq!(decode_data(""), None);
    }

    #[test]
    fn workflow_events_are_classified() {
        assert_eq!(
            WorkflowEvent::from_frame(&json!({"event": "stream_start"})),
            WorkflowEvent::Started
        );
        assert_eq!(
            WorkflowEvent::from_frame(&json!({"event": "stream_chunk", "data": {"chunk": "x"}})),
            WorkflowEvent::Chunk("x".into())
        );
        assert_eq!(
            WorkflowEvent::from_frame(&json!({"event": "stream_chunk", "data": {"chunk": ""}})),
            WorkflowEvent::Other
        );
        assert_eq!(
            WorkflowEvent::from_frame(&json!({
                "event": "workflow_finished",
                "conversationId": "c-9",
                "data": {"outputs": {"answer": "done"}}
            })),
            WorkflowEvent::Finished(RelayAnswer {
                answer: "done".into(),
                conversation_id: Some("c-9".into()),
            })
        );
        assert_eq!(
            WorkflowEvent::from_frame(&json!({
                "event": "workflow_finished",
                "conversationId": "c-9",
                "data": {"outputs": {}}
            })),
            WorkflowEvent::Finished(RelayAnswer {
                answer: String::new(),
                conversation_id: Some("c-9".into()),
            })
        );
        assert_eq!(
            WorkflowEvent::from_frame(&json!({"event": "node_started"})),
            WorkflowEvent::Other
        );
    }

    #[test]
    fn payload_carries_query_and_conversation() {
        let relay = WorkflowRelay::new(config("http://127.0.0.1:1/run", Duration::from_secs(1)))
            .expect("client builds");
        let payload = relay.payload(&RelayRequest {
            message: "hello".into(),
            conversation_id: "c-1".into(),
        });
        assert_eq!(payload["appId"], 229);
        assert_eq!(payload["query"], "hello");
        assert_eq!(payload["conversationId"], "c-1");
        assert_eq!(payload["files"], json!([]));
    }

    fn config(url: &str, timeout: Duration) -> RelayConfig {
        RelayConfig {
            upstream_url: Url::parse(url).expect("valid test url"),
            token: "test-token".into(),
            app_id: 229,
            timeout,
            input_params: json!([]),
            files: json!([]),
            max_concurrency: 2,
            insecure_tls: false,
        }
    }

    /// Serve `app` on an ephemeral port and return the upstream URL.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener has address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/run")
    }

    #[tokio::test]
    async fn streams_progress_and_returns_final_answer() {
        let body = concat!(
            "data: {\"event\":\"stream_start\"}\n\n",
            "data: {\"event\":\"stream_chunk\",\"data\":{\"chunk\":\"Hel\"}}\n\n",
            "data: {broken\n\n",
            "data: {\"event\":\"stream_chunk\",\"data\":{\"chunk\":\"lo\"}}\n\n",
            "data: {\"event\":\"workflow_finished\",\"conversationId\":\"c-42\",",
            "\"data\":{\"outputs\":{\"answer\":\"Hello\"}}}\n\n",
        );
        let app = Router::new().route(
            "/run",
            post(move || async move { ([(header::CONTENT_TYPE, "text/event-stream")], body) }),
        );
        let url = serve(app).await;
        let relay = WorkflowRelay::new(config(&url, Duration::from_secs(5))).expect("client");

        let (tx, mut rx) = mpsc::channel(16);
        let answer = relay
            .send(
                RelayRequest {
                    message: "hi".into(),
                    conversation_id: String::new(),
                },
                Some(tx),
            )
            .await
            .expect("relay succeeds");

        assert_eq!(answer.answer, "Hello");
        assert_eq!(answer.conversation_id.as_deref(), Some("c-42"));

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert!(matches!(frames[0], StreamFrame::Start { .. }));
        assert_eq!(
            &frames[1..],
            &[
                StreamFrame::Chunk { chunk: "Hel".into() },
                StreamFrame::Chunk { chunk: "lo".into() },
            ]
        );
    }

    #[tokio::test]
    async fn events_split_across_chunks_are_reassembled() {
        let app = Router::new().route(
            "/run",
            post(|| async {
                let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
                    Ok("data: {\"event\":\"stream_ch"),
                    Ok("unk\",\"data\":{\"chunk\":\"Hi\"}}\r\n\r\ndata: {\"event\":\"workflow_fin"),
                    Ok("ished\",\"conversationId\":\"c-7\",\"data\":{\"outputs\":{}}}\n\n"),
                ];
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    axum::body::Body::from_stream(futures_util::stream::iter(chunks)),
                )
            }),
        );
        let url = serve(app).await;
        let relay = WorkflowRelay::new(config(&url, Duration::from_secs(5))).expect("client");

        let (tx, mut rx) = mpsc::channel(16);
        let answer = relay
            .send(
                RelayRequest {
                    message: "hi".into(),
                    conversation_id: String::new(),
                },
                Some(tx),
            )
            .await
            .expect("an empty final answer still completes");
        assert_eq!(answer.answer, "");
        assert_eq!(answer.conversation_id.as_deref(), Some("c-7"));
        assert_eq!(rx.recv().await, Some(StreamFrame::Chunk { chunk: "Hi".into() }));
    }

    #[tokio::test]
    async fn decodes_plain_json_reply() {
        let app = Router::new().route(
            "/run",
            post(|| async {
                axum::Json(json!({
                    "conversationId": "c-1",
                    "data": {"outputs": {"answer": "batch answer"}}
                }))
            }),
        );
        let url = serve(app).await;
        let relay = WorkflowRelay::new(config(&url, Duration::from_secs(5))).expect("client");
        let answer = relay
            .send(
                RelayRequest {
                    message: "hi".into(),
                    conversation_id: String::new(),
                },
                None,
            )
            .await
            .expect("relay succeeds");
        assert_eq!(answer.answer, "batch answer");
        assert_eq!(answer.conversation_id.as_deref(), Some("c-1"));
    }

    #[tokio::test]
    async fn stream_without_final_event_is_incomplete() {
        let app = Router::new().route(
            "/run",
            post(|| async {
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    "data: {\"event\":\"stream_start\"}\n\n",
                )
            }),
        );
        let url = serve(app).await;
        let relay = WorkflowRelay::new(config(&url, Duration::from_secs(5))).expect("client");
        let result = relay
            .send(
                RelayRequest {
                    message: "hi".into(),
                    conversation_id: String::new(),
                },
                None,
            )
            .await;
        assert_eq!(result, Err(RelayError::Incomplete));
    }

    #[tokio::test]
    async fn non_success_status_is_upstream_error() {
        let app = Router::new().route(
            "/run",
            post(|| async { (axum::http::StatusCode::BAD_GATEWAY, "boom") }),
        );
        let url = serve(app).await;
        let relay = WorkflowRelay::new(config(&url, Duration::from_secs(5))).expect("client");
        let result = relay
            .send(
                RelayRequest {
                    message: "hi".into(),
                    conversation_id: String::new(),
                },
                None,
            )
            .await;
        match result {
            Err(RelayError::Upstream(detail)) => assert!(detail.contains("502")),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let app = Router::new().route(
            "/run",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        );
        let url = serve(app).await;
        let timeout = Duration::from_millis(100);
        let relay = WorkflowRelay::new(config(&url, timeout)).expect("client");
        let result = relay
            .send(
                RelayRequest {
                    message: "hi".into(),
                    conversation_id: String::new(),
                },
                None,
            )
            .await;
        assert_eq!(result, Err(RelayError::Timeout(timeout)));
    }
}
