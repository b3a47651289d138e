//! Custom extractors.
//!
//! `AppJson<T>` replaces `axum::Json<T>` in handler signatures so that
//! deserialization failures produce a JSON `AppError` instead of axum's
//! default plain-text 422 response. `ClientOrigin` resolves the session key
//! that scopes forms and conversation state.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request, rejection::JsonRejection},
    http::request::Parts,
};

use crate::error::AppError;

/// Header a client may send to pin its session explicitly.
pub const SESSION_HEADER: &str = "x-session-id";
const ANONYMOUS_ORIGIN: &str = "anonymous";

/// JSON extractor that converts deserialization errors to structured `AppError` responses.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

/// Convert a `JsonRejection` to a structured `AppError::Validation`.
pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();

    // "missing field `form_id`" → field = "form_id"
    let field_hint = extract_field_from_serde_message(&body_text);

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(field_hint.unwrap_or("body".to_string())),
        received: None,
        docs_hint: Some(
            "Send a JSON body with Content-Type: application/json (schemas at /api-doc/openapi.json)."
                .to_string(),
        ),
    }
}

/// Try to extract a field name from serde's error messages.
fn extract_field_from_serde_message(msg: &str) -> Option<String> {
    for pattern in ["missing field `", "unknown field `"] {
        if let Some(start) = msg.find(pattern) {
            let after = &msg[start + pattern.len()..];
            if let Some(end) = after.find('`') {
                return Some(after[..end].to_string());
            }
        }
    }
    None
}

/// Session key of the caller: the `x-session-id` header, else the peer IP,
/// else "anonymous".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrigin(pub String);

impl<S> FromRequestParts<S> for ClientOrigin
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        if let Some(session) = from_header {
            return Ok(ClientOrigin(session));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientOrigin(
            peer.unwrap_or_else(|| ANONYMOUS_ORIGIN.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    #[test]
    fn extracts_missing_field_name() {
        let msg = "Failed to deserialize: missing field `form_id` at line 1 column 72";
        assert_eq!(
            extract_field_from_serde_message(msg),
            Some("form_id".to_string())
        );
    }

    #[test]
    fn extracts_unknown_field_name() {
        let msg = "unknown field `foo`, expected one of `bar`, `baz`";
        assert_eq!(
            extract_field_from_serde_message(msg),
            Some("foo".to_string())
        );
    }

    #[test]
    fn returns_none_for_generic_error() {
        let msg = "invalid type: string, expected u64";
        assert_eq!(extract_field_from_serde_message(msg), None);
    }

    async fn origin_of(request: HttpRequest<()>) -> ClientOrigin {
        let (mut parts, _) = request.into_parts();
        let Ok(origin) = ClientOrigin::from_request_parts(&mut parts, &()).await;
        origin
    }

    #[tokio::test]
    async fn origin_prefers_session_header() {
        let mut request = HttpRequest::builder()
            .header(SESSION_HEADER, " tab-7 ")
            .body(())
            .expect("request should build");
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))));
        assert_eq!(origin_of(request).await, ClientOrigin("tab-7".into()));
    }

    #[tokio::test]
    async fn origin_falls_back_to_peer_ip_then_anonymous() {
        let mut request = HttpRequest::builder()
            .body(())
            .expect("request should build");
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))));
        assert_eq!(origin_of(request).await, ClientOrigin("10.0.0.1".into()));

        let request = HttpRequest::builder()
            .body(())
            .expect("request should build");
        assert_eq!(origin_of(request).await, ClientOrigin("anonymous".into()));
    }
}
