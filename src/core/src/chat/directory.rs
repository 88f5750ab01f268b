use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use huddle_protocol::ConversationSummary;

/// Lookup and storage of conversation metadata.
///
/// Persistence lives outside huddle; the coordinator only needs to know
/// whether a conversation exists and whether it is archived, and to publish
/// changes to the sidebar.
pub trait ConversationDirectory: Send + Sync {
    fn get(&self, conversation_id: &str) -> Option<ConversationSummary>;
    fn list(&self) -> Vec<ConversationSummary>;
    fn upsert(&self, summary: ConversationSummary);
    /// Returns whether an entry was removed.
    fn delete(&self, conversation_id: &str) -> bool;
}

/// In-memory directory used by the gateway and tests.
#[derive(Default)]
pub struct MemoryConversations {
    entries: Mutex<HashMap<String, ConversationSummary>>,
}

impl MemoryConversations {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ConversationSummary>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConversationDirectory for MemoryConversations {
    fn get(&self, conversation_id: &str) -> Option<ConversationSummary> {
        self.entries().get(conversation_id).cloned()
    }

    fn list(&self) -> Vec<ConversationSummary> {
        let mut out: Vec<_> = self.entries().values().cloned().collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    fn upsert(&self, mut summary: ConversationSummary) {
        summary.updated_at = Utc::now();
        self.entries().insert(summary.id.clone(), summary);
    }

    fn delete(&self, conversation_id: &str) -> bool {
        self.entries().remove(conversation_id).is_some()
    }
}
