use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use agentdesk_core::chat::{ChatMessage, SESSION_LOG_CAP};

/// Upstream conversation thread and delivered answers of one origin.
#[derive(Debug, Clone)]
pub struct ConversationState {
    /// Empty until the upstream hands out an id
    pub conversation_id: String,
    pub messages: VecDeque<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ConversationState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            conversation_id: String::new(),
            messages: VecDeque::new(),
            created_at: now,
            last_activity: now,
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, ConversationState>,
    /// Process-wide log backing `/api/messages` polling
    log: VecDeque<ChatMessage>,
    last_message_id: u64,
}

/// Per-origin conversation state plus the process-wide message log.
#[derive(Default)]
pub struct ConversationStore {
    inner: Mutex<Inner>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get or create the session for `origin`, mark it active and return its
    /// remembered conversation id (possibly empty).
    pub fn touch(&self, origin: &str) -> String {
        let now = Utc::now();
        let mut inner = self.inner();
        let session = inner
            .sessions
            .entry(origin.to_string())
            .or_insert_with(|| ConversationState::new(now));
        session.last_activity = now;
        session.conversation_id.clone()
    }

    /// Record a completed answer. This is the only place the conversation
    /// id changes, so failed relays leave the session untouched.
    pub fn record_answer(&self, origin: &str, answer: &str, conversation_id: &str) -> ChatMessage {
        let now = Utc::now();
        let mut inner = self.inner();
        inner.last_message_id += 1;
        let message = ChatMessage {
            id: inner.last_message_id,
            message: answer.to_string(),
            timestamp: now,
            session_id: origin.to_string(),
        };

        let session = inner
            .sessions
            .entry(origin.to_string())
            .or_insert_with(|| ConversationState::new(now));
        if !conversation_id.is_empty() && session.conversation_id != conversation_id {
            tracing::info!(origin, conversation_id, "Conversation id updated");
            session.conversation_id = conversation_id.to_string();
        }
        session.last_activity = now;
        push_capped(&mut session.messages, message.clone());
        push_capped(&mut inner.log, message.clone());

        message
    }

    /// Newest logged message with an id above `last_id`.
    pub fn latest_after(&self, last_id: u64) -> Option<ChatMessage> {
        self.inner()
            .log
            .back()
            .filter(|m| m.id > last_id)
            .cloned()
    }

    pub fn session(&self, origin: &str) -> Option<ConversationState> {
        self.inner().sessions.get(origin).cloned()
    }

    pub fn active_sessions(&self) -> usize {
        self.inner().sessions.len()
    }

    /// Drop every session and the message log. Message ids keep counting so
    /// pollers never see an id reused.
    pub fn reset(&self) {
        let mut inner = self.inner();
        inner.sessions.clear();
        inner.log.clear();
    }
}

fn push_capped(log: &mut VecDeque<ChatMessage>, message: ChatMessage) {
    log.push_back(message);
    while log.len() > SESSION_LOG_CAP {
        log.pop_front();
    }
}
