use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use huddle_protocol::{FinalStatus, InflightSnapshot, RunStatus, ToolCallState, ToolStateUpdate};

/// Default cap on tool-call entries kept per run.
pub const DEFAULT_MAX_TOOL_CALLS: usize = 50;
/// Default number of finalized `(conversation, inflight)` pairs remembered.
pub const DEFAULT_FINALIZED_MEMORY: usize = 256;

/// Invoked once when a run is cancelled from outside.
pub type CancelFn = Box<dyn FnOnce() + Send + 'static>;

/// Result of [`InflightRegistry::create_or_get_active`].
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Created(InflightSnapshot),
    /// A run with the same pair was already active; returned unchanged.
    Existing(InflightSnapshot),
}

impl Registration {
    pub fn snapshot(&self) -> &InflightSnapshot {
        match self {
            Self::Created(s) | Self::Existing(s) => s,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Result of [`InflightRegistry::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The run was active and has now been removed.
    Cancelled,
    /// No active run for that pair. Repeated cancels land here.
    NotFound,
}

impl CancelOutcome {
    pub fn ok(self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn finalized_now(self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

struct TrackedTool {
    state: ToolCallState,
    touched: u64,
}

struct InflightEntry {
    started_at: DateTime<Utc>,
    assistant_text: String,
    tools: Vec<TrackedTool>,
    clock: u64,
    cancel: Option<CancelFn>,
}

impl InflightEntry {
    fn snapshot(&self, conversation_id: &str, inflight_id: &str) -> InflightSnapshot {
        InflightSnapshot {
            conversation_id: conversation_id.to_string(),
            inflight_id: inflight_id.to_string(),
            status: RunStatus::Active,
            started_at: self.started_at,
            assistant_text: self.assistant_text.clone(),
            tools: self.tools.iter().map(|t| t.state.clone()).collect(),
        }
    }

    /// Merge into an existing id or append, evicting the least recently
    /// touched entries so the list never exceeds `max`.
    fn upsert_tool(&mut self, update: ToolStateUpdate, max: usize) -> ToolCallState {
        self.clock += 1;
        let tick = self.clock;

        if let Some(tool) = self.tools.iter_mut().find(|t| t.state.id == update.id) {
            tool.state.apply(update);
            tool.touched = tick;
            return tool.state.clone();
        }

        while self.tools.len() >= max {
            let Some(oldest) = self
                .tools
                .iter()
                .enumerate()
                .min_by_key(|(_, t)| t.touched)
                .map(|(idx, _)| idx)
            else {
                break;
            };
            let evicted = self.tools.remove(oldest);
            tracing::debug!(tool_id = %evicted.state.id, "evicted tool state");
        }

        let state = ToolCallState::from_update(update);
        self.tools.push(TrackedTool {
            state: state.clone(),
            touched: tick,
        });
        state
    }
}

#[derive(Default)]
struct RegistryState {
    /// conversation id → inflight id → entry
    runs: HashMap<String, HashMap<String, InflightEntry>>,
    recently_finalized: VecDeque<(String, String)>,
}

impl RegistryState {
    fn remove(&mut self, conversation_id: &str, inflight_id: &str) -> Option<InflightEntry> {
        let runs = self.runs.get_mut(conversation_id)?;
        let entry = runs.remove(inflight_id)?;
        if runs.is_empty() {
            self.runs.remove(conversation_id);
        }
        Some(entry)
    }

    fn remember_finalized(&mut self, conversation_id: &str, inflight_id: &str, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.recently_finalized.len() >= capacity {
            self.recently_finalized.pop_front();
        }
        self.recently_finalized
            .push_back((conversation_id.to_string(), inflight_id.to_string()));
    }
}

/// Authoritative in-memory state of the runs currently in flight.
///
/// Every check-and-mutate happens under one mutex, so concurrent callers
/// from the HTTP, WebSocket and RPC surfaces see a consistent view.
/// Cancellation callbacks run after the lock is released.
pub struct InflightRegistry {
    state: Mutex<RegistryState>,
    max_tool_calls: usize,
    finalized_memory: usize,
}

impl Default for InflightRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOOL_CALLS, DEFAULT_FINALIZED_MEMORY)
    }
}

impl InflightRegistry {
    pub fn new(max_tool_calls: usize, finalized_memory: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            max_tool_calls: max_tool_calls.max(1),
            finalized_memory,
        }
    }

    pub fn max_tool_calls(&self) -> usize {
        self.max_tool_calls
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a run, or return the one already registered for this exact
    /// pair. An existing entry keeps its original cancel callback.
    pub fn create_or_get_active(
        &self,
        conversation_id: &str,
        inflight_id: &str,
        cancel: Option<CancelFn>,
    ) -> Registration {
        let mut state = self.state();
        let runs = state.runs.entry(conversation_id.to_string()).or_default();
        if let Some(existing) = runs.get(inflight_id) {
            return Registration::Existing(existing.snapshot(conversation_id, inflight_id));
        }

        let entry = InflightEntry {
            started_at: Utc::now(),
            assistant_text: String::new(),
            tools: Vec::new(),
            clock: 0,
            cancel,
        };
        let snapshot = entry.snapshot(conversation_id, inflight_id);
        runs.insert(inflight_id.to_string(), entry);
        tracing::info!(conversation_id, inflight_id, "inflight run registered");
        Registration::Created(snapshot)
    }

    /// Snapshot of the active run of a conversation, if any.
    pub fn get_active(&self, conversation_id: &str) -> Option<InflightSnapshot> {
        let state = self.state();
        let runs = state.runs.get(conversation_id)?;
        runs.iter()
            .max_by_key(|(_, entry)| entry.started_at)
            .map(|(inflight_id, entry)| entry.snapshot(conversation_id, inflight_id))
    }

    pub fn get(&self, conversation_id: &str, inflight_id: &str) -> Option<InflightSnapshot> {
        let state = self.state();
        state
            .runs
            .get(conversation_id)?
            .get(inflight_id)
            .map(|entry| entry.snapshot(conversation_id, inflight_id))
    }

    /// Every active run, ordered by conversation id.
    pub fn active_runs(&self) -> Vec<InflightSnapshot> {
        let state = self.state();
        let mut out: Vec<InflightSnapshot> = state
            .runs
            .iter()
            .flat_map(|(conversation_id, runs)| {
                runs.iter()
                    .map(move |(inflight_id, entry)| entry.snapshot(conversation_id, inflight_id))
            })
            .collect();
        out.sort_by(|a, b| {
            a.conversation_id
                .cmp(&b.conversation_id)
                .then_with(|| a.started_at.cmp(&b.started_at))
        });
        out
    }

    /// Merge `update` into the run's tool list. Returns the resulting entry,
    /// or `None` (ignored) when the run does not exist.
    pub fn update_tool_state(
        &self,
        conversation_id: &str,
        inflight_id: &str,
        update: ToolStateUpdate,
    ) -> Option<ToolCallState> {
        let max = self.max_tool_calls;
        let mut state = self.state();
        let entry = state.runs.get_mut(conversation_id)?.get_mut(inflight_id)?;
        Some(entry.upsert_tool(update, max))
    }

    /// Append streamed assistant text. Returns false if the run is gone.
    pub fn append_delta(&self, conversation_id: &str, inflight_id: &str, delta: &str) -> bool {
        let mut state = self.state();
        match state
            .runs
            .get_mut(conversation_id)
            .and_then(|runs| runs.get_mut(inflight_id))
        {
            Some(entry) => {
                entry.assistant_text.push_str(delta);
                true
            }
            None => false,
        }
    }

    /// Discard the text streamed by a failed attempt before the provider
    /// retries. Tool states are kept and merge by id. Returns the fresh
    /// snapshot, or `None` if the run is gone.
    pub fn reset_attempt(&self, conversation_id: &str, inflight_id: &str) -> Option<InflightSnapshot> {
        let mut state = self.state();
        let entry = state.runs.get_mut(conversation_id)?.get_mut(inflight_id)?;
        entry.assistant_text.clear();
        tracing::debug!(conversation_id, inflight_id, "inflight text reset for retry");
        Some(entry.snapshot(conversation_id, inflight_id))
    }

    /// Cancel an active run: remove it and invoke its cancel callback.
    /// Only the first call for a given run reports [`CancelOutcome::Cancelled`].
    pub fn cancel(&self, conversation_id: &str, inflight_id: &str) -> CancelOutcome {
        let entry = {
            let mut state = self.state();
            let Some(entry) = state.remove(conversation_id, inflight_id) else {
                return CancelOutcome::NotFound;
            };
            state.remember_finalized(conversation_id, inflight_id, self.finalized_memory);
            entry
        };
        tracing::info!(conversation_id, inflight_id, "inflight run cancelled");
        if let Some(cancel) = entry.cancel {
            cancel();
        }
        CancelOutcome::Cancelled
    }

    /// Remove a run that ended on its own. Idempotent; returns whether an
    /// entry was actually removed.
    pub fn finalize(&self, conversation_id: &str, inflight_id: &str, status: FinalStatus) -> bool {
        let mut state = self.state();
        if state.remove(conversation_id, inflight_id).is_none() {
            return false;
        }
        state.remember_finalized(conversation_id, inflight_id, self.finalized_memory);
        tracing::info!(
            conversation_id,
            inflight_id,
            status = status.as_str(),
            "inflight run finalized"
        );
        true
    }

    /// Whether this pair was finalized recently (bounded memory).
    pub fn was_finalized(&self, conversation_id: &str, inflight_id: &str) -> bool {
        self.state()
            .recently_finalized
            .iter()
            .any(|(c, i)| c == conversation_id && i == inflight_id)
    }

    pub fn len(&self) -> usize {
        self.state().runs.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.state().runs.is_empty()
    }

    /// Drop every run without invoking callbacks.
    pub fn reset(&self) {
        let mut state = self.state();
        state.runs.clear();
        state.recently_finalized.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_cancel(counter: &Arc<AtomicUsize>) -> CancelFn {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn cancel_without_run_is_not_found() {
        let registry = InflightRegistry::default();
        assert_eq!(registry.cancel("c", "i"), CancelOutcome::NotFound);
        assert!(!registry.cancel("c", "i").ok());
    }

    #[test]
    fn cancel_invokes_callback_exactly_once() {
        let registry = InflightRegistry::default();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.create_or_get_active("c1", "i1", Some(counting_cancel(&counter)));

        let first = registry.cancel("c1", "i1");
        assert!(first.ok());
        assert!(first.finalized_now());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let second = registry.cancel("c1", "i1");
        assert_eq!(second, CancelOutcome::NotFound);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(registry.get_active("c1").is_none());
    }

    #[test]
    fn create_is_idempotent_and_keeps_first_callback() {
        let registry = InflightRegistry::default();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let created = registry.create_or_get_active("c1", "i1", Some(counting_cancel(&first)));
        assert!(created.is_created());
        let again = registry.create_or_get_active("c1", "i1", Some(counting_cancel(&second)));
        assert!(!again.is_created());
        assert_eq!(again.snapshot().inflight_id, "i1");
        assert_eq!(registry.len(), 1);

        registry.cancel("c1", "i1");
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn get_active_reports_none_when_idle() {
        let registry = InflightRegistry::default();
        assert!(registry.get_active("c1").is_none());
        registry.create_or_get_active("c1", "i1", None);
        let snapshot = registry.get_active("c1").unwrap();
        assert_eq!(snapshot.inflight_id, "i1");
        assert_eq!(snapshot.status, RunStatus::Active);
        assert!(snapshot.tools.is_empty());
    }

    #[test]
    fn tool_updates_merge_by_id() {
        let registry = InflightRegistry::default();
        registry.create_or_get_active("c1", "i1", None);
        registry.update_tool_state("c1", "i1", ToolStateUpdate::new("t1").status("requesting"));
        registry.update_tool_state("c1", "i1", ToolStateUpdate::new("t1").status("done"));

        let tools = registry.get_active("c1").unwrap().tools;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].status, "done");
    }

    #[test]
    fn tool_update_without_run_is_ignored() {
        let registry = InflightRegistry::default();
        assert!(registry
            .update_tool_state("c1", "i1", ToolStateUpdate::new("t1"))
            .is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn tool_list_is_capped() {
        let registry = InflightRegistry::new(10, 4);
        registry.create_or_get_active("c1", "i1", None);
        for n in 0..60 {
            registry.update_tool_state(
                "c1",
                "i1",
                ToolStateUpdate::new(format!("t{n}")).status("running"),
            );
        }
        let tools = registry.get_active("c1").unwrap().tools;
        assert_eq!(tools.len(), 10);
        assert_eq!(tools[0].id, "t50");
        assert_eq!(tools[9].id, "t59");
    }

    #[test]
    fn eviction_prefers_least_recently_updated() {
        let registry = InflightRegistry::new(3, 4);
        registry.create_or_get_active("c1", "i1", None);
        for id in ["a", "b", "c"] {
            registry.update_tool_state("c1", "i1", ToolStateUpdate::new(id).status("running"));
        }
        // Touch "a" so "b" becomes the oldest.
        registry.update_tool_state("c1", "i1", ToolStateUpdate::new("a").status("done"));
        registry.update_tool_state("c1", "i1", ToolStateUpdate::new("d").status("running"));

        let ids: Vec<String> = registry
            .get_active("c1")
            .unwrap()
            .tools
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["a", "c", "d"]);
    }

    #[test]
    fn finalize_is_idempotent_and_remembered() {
        let registry = InflightRegistry::default();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.create_or_get_active("c1", "i1", Some(counting_cancel(&counter)));

        assert!(registry.finalize("c1", "i1", FinalStatus::Completed));
        assert!(!registry.finalize("c1", "i1", FinalStatus::Completed));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(registry.was_finalized("c1", "i1"));
        assert!(!registry.was_finalized("c1", "other"));
        assert_eq!(registry.cancel("c1", "i1"), CancelOutcome::NotFound);
    }

    #[test]
    fn finalized_memory_is_bounded() {
        let registry = InflightRegistry::new(5, 2);
        for n in 0..3 {
            let id = format!("i{n}");
            registry.create_or_get_active("c1", &id, None);
            registry.finalize("c1", &id, FinalStatus::Completed);
        }
        assert!(!registry.was_finalized("c1", "i0"));
        assert!(registry.was_finalized("c1", "i1"));
        assert!(registry.was_finalized("c1", "i2"));
    }

    #[test]
    fn deltas_accumulate_into_snapshot() {
        let registry = InflightRegistry::default();
        registry.create_or_get_active("c1", "i1", None);
        assert!(registry.append_delta("c1", "i1", "Hel"));
        assert!(registry.append_delta("c1", "i1", "lo"));
        assert!(!registry.append_delta("c1", "missing", "x"));
        assert_eq!(registry.get_active("c1").unwrap().assistant_text, "Hello");
    }

    #[test]
    fn reset_attempt_clears_text_but_keeps_tools() {
        let registry = InflightRegistry::default();
        registry.create_or_get_active("c1", "i1", None);
        registry.append_delta("c1", "i1", "partial");
        registry.update_tool_state("c1", "i1", ToolStateUpdate::new("t1").status("running"));

        let snapshot = registry.reset_attempt("c1", "i1").unwrap();
        assert_eq!(snapshot.assistant_text, "");
        assert_eq!(snapshot.tools.len(), 1);
        assert!(registry.reset_attempt("c1", "missing").is_none());

        registry.append_delta("c1", "i1", "fresh");
        assert_eq!(registry.get_active("c1").unwrap().assistant_text, "fresh");
    }

    #[test]
    fn active_runs_lists_every_conversation() {
        let registry = InflightRegistry::default();
        registry.create_or_get_active("b", "i2", None);
        registry.create_or_get_active("a", "i1", None);
        let runs = registry.active_runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].conversation_id, "a");
        registry.reset();
        assert!(registry.is_empty());
    }
}
