use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use agentdesk_core::chat::{
    ChatReply, MAX_MESSAGE_CHARS, MessagesRequest, PostMessageRequest, ResetResponse, StreamFrame,
};
use agentdesk_core::error::ApiError;

use crate::error::AppError;
use crate::extract::{AppJson, ClientOrigin};
use crate::registry::FormDiscipline;
use crate::relay::{RelayAnswer, RelayError, RelayRequest};
use crate::sanitize;
use crate::state::AppState;

/// Frames buffered between the relay task and a slow SSE client.
const FRAME_BUFFER: usize = 32;

/// The relay endpoint, rate limited separately in `main`.
pub fn post_router() -> Router<AppState> {
    Router::new().route("/post", post(post_message))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/messages", post(latest_message))
        .route("/reset", post(reset_conversation))
}

/// Pick the message to relay, check its length and escape it.
fn validate_message(req: &PostMessageRequest) -> Result<String, AppError> {
    let message = match req.message.trim() {
        "" => req.option_value.as_deref().unwrap_or_default().trim(),
        text => text,
    };
    if message.is_empty() {
        return Err(AppError::validation("message must not be empty", "message"));
    }
    let chars = message.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(AppError::Validation {
            message: format!("message is too long ({chars} characters, limit {MAX_MESSAGE_CHARS})"),
            field: Some("message".to_string()),
            received: None,
            docs_hint: Some("Shorten the message and send it again.".to_string()),
        });
    }
    Ok(sanitize::escape_html(message))
}

/// Relay a chat message upstream
///
/// Streams `start`, `chunk`, `complete` or `error` frames as server-sent
/// events, or answers with one JSON body when streaming is disabled. Refused
/// while a choice form is waiting for an answer.
#[utoipa::path(
    post,
    path = "/post",
    request_body = PostMessageRequest,
    responses(
        (status = 200, description = "SSE stream of StreamFrame, or a ChatReply when streaming is off", body = ChatReply),
        (status = 400, description = "Empty or oversized message", body = ApiError),
        (status = 409, description = "A choice form must be answered first", body = ApiError),
        (status = 502, description = "Upstream failed (batch mode)", body = ApiError),
        (status = 504, description = "Upstream timed out (batch mode)", body = ApiError)
    ),
    tag = "chat"
)]
pub async fn post_message(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
    AppJson(req): AppJson<PostMessageRequest>,
) -> Result<Response, AppError> {
    let message = validate_message(&req)?;

    if state.forms.has_pending_choice(state.forms.scope_for(&origin)) {
        return Err(AppError::Conflict {
            message: "Answer the pending choice form before sending new messages".to_string(),
            field: Some("forms".to_string()),
            docs_hint: Some(
                "Submit it via POST /api/submit_form or clear it via POST /api/clear_forms."
                    .to_string(),
            ),
        });
    }

    let remembered = state.conversations.touch(&origin);
    let conversation_id = req
        .conversation_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or(remembered);

    tracing::info!(
        origin = %origin,
        conversation_id = %conversation_id,
        chars = message.chars().count(),
        "Chat message received"
    );

    let request = RelayRequest {
        message,
        conversation_id: conversation_id.clone(),
    };

    if !state.streaming {
        let answer = state.relay.send(request, None).await?;
        let conversation_id = answer.conversation_id.unwrap_or(conversation_id);
        let logged = state
            .conversations
            .record_answer(&origin, &answer.answer, &conversation_id);
        return Ok(Json(ChatReply {
            status: "success".to_string(),
            message: answer.answer,
            timestamp: logged.timestamp,
            id: logged.id,
            conversation_id,
        })
        .into_response());
    }

    let (tx, rx) = mpsc::channel::<StreamFrame>(FRAME_BUFFER);
    tokio::spawn(async move {
        let outcome = state.relay.send(request, Some(tx.clone())).await;
        let frame = conclude(&state, &origin, conversation_id, outcome);
        // Nobody to tell if the client already hung up.
        let _ = tx.send(frame).await;
    });

    let stream = ReceiverStream::new(rx).map(|frame| Event::default().json_data(frame));
    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// Turn the relay outcome into the terminal frame. Only a completed answer
/// touches conversation state.
fn conclude(
    state: &AppState,
    origin: &str,
    conversation_id: String,
    outcome: Result<RelayAnswer, RelayError>,
) -> StreamFrame {
    match outcome {
        Ok(answer) => {
            let conversation_id = answer.conversation_id.unwrap_or(conversation_id);
            state
                .conversations
                .record_answer(origin, &answer.answer, &conversation_id);
            StreamFrame::Complete {
                answer: answer.answer,
                conversation_id,
            }
        }
        Err(err) => {
            tracing::warn!(origin, error = %err, "Chat relay failed");
            StreamFrame::Error {
                message: err.to_string(),
            }
        }
    }
}

/// Newest assistant message
///
/// Returns the newest logged message whose id is above `last_message_id`,
/// or `{"status": "no_new_messages"}`.
#[utoipa::path(
    post,
    path = "/api/messages",
    request_body = MessagesRequest,
    responses(
        (status = 200, description = "Newest message or no_new_messages status", body = agentdesk_core::chat::ChatMessage)
    ),
    tag = "chat"
)]
pub async fn latest_message(
    State(state): State<AppState>,
    AppJson(req): AppJson<MessagesRequest>,
) -> Response {
    match state.conversations.latest_after(req.last_message_id) {
        Some(message) => Json(message).into_response(),
        None => Json(json!({"status": "no_new_messages"})).into_response(),
    }
}

/// Reset conversation state
///
/// Clears every session's conversation id and the message log. In session
/// discipline the caller's pending forms are cleared too; the shared pool
/// is left alone.
#[utoipa::path(
    post,
    path = "/reset",
    responses(
        (status = 200, description = "State reset", body = ResetResponse)
    ),
    tag = "chat"
)]
pub async fn reset_conversation(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
) -> Json<ResetResponse> {
    state.conversations.reset();
    let cleared_forms = match state.forms.discipline() {
        FormDiscipline::Session => state.forms.clear_all(Some(&origin)),
        FormDiscipline::Pool { .. } => 0,
    };
    tracing::info!(origin = %origin, cleared_forms, "Conversation state reset");

    Json(ResetResponse {
        status: "success".to_string(),
        message: "Conversation reset".to_string(),
        timestamp: Utc::now(),
        cleared_forms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_message_falls_back_to_option_value() {
        let req = PostMessageRequest {
            message: "   ".into(),
            option_value: Some("Room A".into()),
            ..Default::default()
        };
        assert_eq!(validate_message(&req).expect("valid"), "Room A");
    }

    #[test]
    fn empty_message_without_option_is_rejected() {
        let req = PostMessageRequest::default();
        assert!(matches!(
            validate_message(&req),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn length_cap_counts_characters() {
        let req = PostMessageRequest {
            message: "会".repeat(MAX_MESSAGE_CHARS),
            ..Default::default()
        };
        assert!(validate_message(&req).is_ok());

        let req = PostMessageRequest {
            message: "a".repeat(MAX_MESSAGE_CHARS + 1),
            ..Default::default()
        };
        assert!(validate_message(&req).is_err());
    }

    #[test]
    fn message_is_escaped() {
        let req = PostMessageRequest {
            message: " <script> ".into(),
            ..Default::default()
        };
        assert_eq!(validate_message(&req).expect("valid"), "&lt;script&gt;");
    }
}
