use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Process-wide run exclusivity, keyed by conversation id.
///
/// A conversation is either held or not. Both the HTTP surface and the RPC
/// surfaces go through the same instance, so at most one run starts per
/// conversation in this process. Each hold carries a generation so a guard
/// outliving an explicit [`release`](Self::release) cannot free a later hold.
#[derive(Debug, Default)]
pub struct ConversationLocks {
    state: Mutex<LockState>,
}

#[derive(Debug, Default)]
struct LockState {
    /// conversation id → generation of the current hold
    held: HashMap<String, u64>,
    next_generation: u64,
}

impl LockState {
    fn acquire(&mut self, conversation_id: &str) -> Option<u64> {
        if self.held.contains_key(conversation_id) {
            return None;
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        self.held.insert(conversation_id.to_string(), generation);
        tracing::debug!(conversation_id, generation, "run lock acquired");
        Some(generation)
    }
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the conversation held. Returns false, without changing anything,
    /// if it already was.
    pub fn try_acquire(&self, conversation_id: &str) -> bool {
        self.state().acquire(conversation_id).is_some()
    }

    /// Drop the hold. Releasing an unheld conversation is a no-op.
    pub fn release(&self, conversation_id: &str) {
        if self.state().held.remove(conversation_id).is_some() {
            tracing::debug!(conversation_id, "run lock released");
        }
    }

    fn release_generation(&self, conversation_id: &str, generation: u64) {
        let mut state = self.state();
        if state.held.get(conversation_id) == Some(&generation) {
            state.held.remove(conversation_id);
            tracing::debug!(conversation_id, generation, "run lock released");
        }
    }

    pub fn is_held(&self, conversation_id: &str) -> bool {
        self.state().held.contains_key(conversation_id)
    }

    /// Conversation ids currently held, sorted.
    pub fn held_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state().held.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Like [`try_acquire`](Self::try_acquire) but returns a guard that
    /// releases the hold when dropped, unless the hold was already released
    /// and taken again by someone else.
    pub fn try_guard(self: &Arc<Self>, conversation_id: &str) -> Option<RunLockGuard> {
        let generation = self.state().acquire(conversation_id)?;
        Some(RunLockGuard {
            locks: Arc::clone(self),
            conversation_id: conversation_id.to_string(),
            generation,
        })
    }

    /// Drop every hold.
    pub fn reset(&self) {
        self.state().held.clear();
    }
}

/// Releases its own hold on drop.
#[derive(Debug)]
pub struct RunLockGuard {
    locks: Arc<ConversationLocks>,
    conversation_id: String,
    generation: u64,
}

impl RunLockGuard {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.locks
            .release_generation(&self.conversation_id, self.generation);
    }
}
