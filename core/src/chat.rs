use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Longest accepted chat message (characters, before escaping).
pub const MAX_MESSAGE_CHARS: usize = 2000;
/// Delivered assistant messages kept per session.
pub const SESSION_LOG_CAP: usize = 100;

/// Request for POST /post
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct PostMessageRequest {
    #[serde(default)]
    pub message: String,
    /// Overrides the conversation id remembered for the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Option value picked in the UI; used as the message when `message` is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_value: Option<String>,
}

/// One server-sent event frame of a streamed chat reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    Start { message: String },
    Chunk { chunk: String },
    Complete { answer: String, conversation_id: String },
    Error { message: String },
}

impl StreamFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Complete { .. } | StreamFrame::Error { .. })
    }
}

/// Response for POST /post when streaming is disabled
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatReply {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub id: u64,
    pub conversation_id: String,
}

/// An assistant message delivered to a session
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub id: u64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

/// Request for POST /api/messages
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct MessagesRequest {
    #[serde(default)]
    pub last_message_id: u64,
}

/// Response for POST /reset
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResetResponse {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Forms removed alongside the conversation state
    pub cleared_forms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_use_lowercase_type_tag() {
        let frame = StreamFrame::Complete {
            answer: "hi".into(),
            conversation_id: "c-1".into(),
        };
        let json = serde_json::to_value(&frame).expect("frame serializes");
        assert_eq!(json["type"], "complete");
        assert_eq!(json["answer"], "hi");
        assert_eq!(json["conversation_id"], "c-1");
        assert!(frame.is_terminal());
        assert!(!StreamFrame::Chunk { chunk: "x".into() }.is_terminal());
    }

    #[test]
    fn post_request_fields_default() {
        let req: PostMessageRequest = serde_json::from_str("{}").expect("empty body parses");
        assert!(req.message.is_empty());
        assert!(req.conversation_id.is_none());
        assert!(req.option_value.is_none());
    }
}
