use std::sync::Arc;

use crate::conversation::ConversationStore;
use crate::registry::FormRegistry;
use crate::relay::ChatRelay;

/// Shared handles injected into every handler. Constructed once in `main`.
#[derive(Clone)]
pub struct AppState {
    pub forms: Arc<FormRegistry>,
    pub conversations: Arc<ConversationStore>,
    pub relay: Arc<dyn ChatRelay>,
    /// Stream chat replies as SSE instead of one JSON body
    pub streaming: bool,
}
