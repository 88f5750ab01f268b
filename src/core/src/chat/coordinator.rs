use std::sync::Arc;

use huddle_protocol::{
    ConversationEvent, ConversationSummary, FinalStatus, InflightSnapshot, SidebarEvent,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::events::EventHub;
use crate::runs::{
    run_with_retry, CancelFn, CancelOutcome, ConversationLocks, DomainError, InflightRegistry,
    Registration, RetryError, RetryPolicy, RunError, RunLockGuard,
};

use super::directory::ConversationDirectory;
use super::provider::{ChatProvider, ProviderError, ProviderEvent, TurnRequest};

const PROVIDER_EVENT_BUFFER: usize = 64;

/// Event stream of one provider attempt.
struct Attempt {
    number: u32,
    events: mpsc::Receiver<ProviderEvent>,
}

/// Starts, streams, and cancels runs, keeping the lock set, the inflight
/// registry, and the event hub consistent with each other.
///
/// Every entry surface (WebSocket, HTTP, RPC tools) goes through here.
pub struct RunCoordinator {
    locks: Arc<ConversationLocks>,
    registry: Arc<InflightRegistry>,
    hub: Arc<EventHub>,
    directory: Arc<dyn ConversationDirectory>,
    provider: Option<Arc<dyn ChatProvider>>,
    retry: RetryPolicy,
}

impl RunCoordinator {
    pub fn new(
        locks: Arc<ConversationLocks>,
        registry: Arc<InflightRegistry>,
        hub: Arc<EventHub>,
        directory: Arc<dyn ConversationDirectory>,
        provider: Option<Arc<dyn ChatProvider>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            locks,
            registry,
            hub,
            directory,
            provider,
            retry,
        }
    }

    /// Build fresh components sized from `config`.
    pub fn from_config(
        config: &ServerConfig,
        directory: Arc<dyn ConversationDirectory>,
        provider: Option<Arc<dyn ChatProvider>>,
    ) -> Arc<Self> {
        let registry = Arc::new(InflightRegistry::new(
            config.max_tool_calls,
            config.finalized_memory,
        ));
        let hub = Arc::new(EventHub::new(Arc::clone(&registry)));
        Arc::new(Self::new(
            Arc::new(ConversationLocks::new()),
            registry,
            hub,
            directory,
            provider,
            config.retry,
        ))
    }

    pub fn locks(&self) -> &Arc<ConversationLocks> {
        &self.locks
    }

    pub fn registry(&self) -> &Arc<InflightRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn directory(&self) -> &Arc<dyn ConversationDirectory> {
        &self.directory
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_deref().map(ChatProvider::name)
    }

    // ── Conversations ────────────────────────────────────────────────

    pub fn create_conversation(&self, id: Option<String>, title: &str) -> ConversationSummary {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let summary = match self.directory.get(&id) {
            Some(mut existing) => {
                existing.title = title.to_string();
                existing
            }
            None => ConversationSummary::new(id.clone(), title),
        };
        self.store_and_announce(summary)
    }

    pub fn archive_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationSummary, DomainError> {
        let mut summary = self
            .directory
            .get(conversation_id)
            .ok_or_else(|| DomainError::conversation_not_found(conversation_id))?;
        summary.archived = true;
        Ok(self.store_and_announce(summary))
    }

    /// Delete a conversation. Refused while a run holds its lock; the lock is
    /// held for the duration of the delete so no run can start meanwhile.
    pub fn delete_conversation(&self, conversation_id: &str) -> Result<(), DomainError> {
        let Some(_guard) = self.locks.try_guard(conversation_id) else {
            return Err(DomainError::run_in_progress(conversation_id));
        };
        if !self.directory.delete(conversation_id) {
            return Err(DomainError::conversation_not_found(conversation_id));
        }
        self.hub.publish_sidebar(SidebarEvent::Delete {
            conversation_id: conversation_id.to_string(),
        });
        tracing::info!(conversation_id, "conversation deleted");
        Ok(())
    }

    fn store_and_announce(&self, summary: ConversationSummary) -> ConversationSummary {
        let id = summary.id.clone();
        self.directory.upsert(summary.clone());
        let stored = self.directory.get(&id).unwrap_or(summary);
        self.hub.publish_sidebar(SidebarEvent::Upsert(stored.clone()));
        stored
    }

    fn set_active_inflight(&self, conversation_id: &str, inflight_id: Option<&str>) {
        let Some(mut summary) = self.directory.get(conversation_id) else {
            return;
        };
        if summary.active_inflight_id.as_deref() == inflight_id {
            return;
        }
        summary.active_inflight_id = inflight_id.map(str::to_string);
        self.store_and_announce(summary);
    }

    fn clear_active_inflight(&self, conversation_id: &str, inflight_id: &str) {
        let current = self
            .directory
            .get(conversation_id)
            .and_then(|summary| summary.active_inflight_id);
        if current.as_deref() == Some(inflight_id) {
            self.set_active_inflight(conversation_id, None);
        }
    }

    // ── Runs ─────────────────────────────────────────────────────────

    /// Start a run, or return the active run registered under the same
    /// `(conversation_id, inflight_id)` pair.
    pub fn start_run(
        self: &Arc<Self>,
        conversation_id: &str,
        inflight_id: Option<String>,
        prompt: &str,
    ) -> Result<Registration, RunError> {
        let provider = self.provider.clone().ok_or(RunError::ProviderUnavailable)?;
        let summary = self
            .directory
            .get(conversation_id)
            .ok_or_else(|| DomainError::conversation_not_found(conversation_id))?;
        if summary.archived {
            return Err(DomainError::conversation_archived(conversation_id).into());
        }

        let inflight_id = inflight_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Some(existing) = self.registry.get(conversation_id, &inflight_id) {
            return Ok(Registration::Existing(existing));
        }

        let Some(guard) = self.locks.try_guard(conversation_id) else {
            // The holder may be an identical start that won the race.
            if let Some(existing) = self.registry.get(conversation_id, &inflight_id) {
                return Ok(Registration::Existing(existing));
            }
            tracing::debug!(conversation_id, "run rejected: lock held");
            return Err(DomainError::run_in_progress(conversation_id).into());
        };

        let cancel = CancellationToken::new();
        let on_cancel: CancelFn = {
            let cancel = cancel.clone();
            Box::new(move || cancel.cancel())
        };
        let registration =
            self.registry
                .create_or_get_active(conversation_id, &inflight_id, Some(on_cancel));
        self.set_active_inflight(conversation_id, Some(&inflight_id));

        let request = TurnRequest {
            conversation_id: conversation_id.to_string(),
            inflight_id,
            prompt: prompt.to_string(),
            attempt: 1,
        };
        tracing::info!(
            conversation_id,
            inflight_id = %request.inflight_id,
            provider = provider.name(),
            "run started"
        );
        tokio::spawn(Arc::clone(self).drive(guard, provider, request, cancel));
        Ok(registration)
    }

    /// Cancel an active run: removes it, signals its task, releases the
    /// conversation, and broadcasts `turn_final` with status `cancelled`.
    ///
    /// The hold is released before the frame is enqueued, so a client
    /// reacting to `turn_final` can start the next run right away even if
    /// the provider has not yet observed the cancellation.
    pub fn cancel_run(&self, conversation_id: &str, inflight_id: &str) -> CancelOutcome {
        let mut outcome = CancelOutcome::NotFound;
        self.hub.publish_conversation_with(conversation_id, || {
            outcome = self.registry.cancel(conversation_id, inflight_id);
            if outcome.ok() {
                self.locks.release(conversation_id);
            }
            outcome.ok().then(|| ConversationEvent::TurnFinal {
                inflight_id: inflight_id.to_string(),
                status: FinalStatus::Cancelled,
            })
        });
        if outcome.ok() {
            self.clear_active_inflight(conversation_id, inflight_id);
        }
        outcome
    }

    pub fn active_run(&self, conversation_id: &str) -> Option<InflightSnapshot> {
        self.registry.get_active(conversation_id)
    }

    async fn drive(
        self: Arc<Self>,
        guard: RunLockGuard,
        provider: Arc<dyn ChatProvider>,
        request: TurnRequest,
        cancel: CancellationToken,
    ) {
        let conversation_id = request.conversation_id.clone();
        let inflight_id = request.inflight_id.clone();

        // One event channel per attempt, handed to the forwarder in order.
        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(Arc::clone(&self).forward_events(
            conversation_id.clone(),
            inflight_id.clone(),
            attempts_rx,
        ));

        let outcome = {
            let attempts_tx = attempts_tx;
            run_with_retry(
                &self.retry,
                &cancel,
                |attempt| {
                    let (events_tx, events_rx) = mpsc::channel(PROVIDER_EVENT_BUFFER);
                    let _ = attempts_tx.send(Attempt {
                        number: attempt,
                        events: events_rx,
                    });
                    provider.stream_turn(
                        TurnRequest {
                            attempt,
                            ..request.clone()
                        },
                        events_tx,
                        cancel.clone(),
                    )
                },
                ProviderError::is_retryable,
                |attempt, err| {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        inflight_id = %inflight_id,
                        attempt,
                        error = %err,
                        "provider turn failed; retrying"
                    );
                },
            )
            .await
        };
        // Drain every streamed event before the final frame goes out.
        if let Err(e) = forwarder.await {
            tracing::warn!(error = %e, "provider event forwarder failed");
        }

        let status = match outcome {
            Ok(_) => FinalStatus::Completed,
            Err(RetryError::Aborted)
            | Err(RetryError::Failed {
                error: ProviderError::Cancelled,
                ..
            }) => FinalStatus::Cancelled,
            Err(RetryError::Failed { attempts, error }) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    inflight_id = %inflight_id,
                    attempts,
                    error = %error,
                    "provider turn failed"
                );
                FinalStatus::Error
            }
        };
        self.finish(guard, &conversation_id, &inflight_id, status);
    }

    /// Finalize (if still active), release the lock, and broadcast
    /// `turn_final`. The lock is released before the frame is enqueued so a
    /// client reacting to `turn_final` can start the next run immediately.
    fn finish(
        &self,
        guard: RunLockGuard,
        conversation_id: &str,
        inflight_id: &str,
        status: FinalStatus,
    ) {
        self.hub.publish_conversation_with(conversation_id, || {
            let removed = self.registry.finalize(conversation_id, inflight_id, status);
            drop(guard);
            removed.then(|| ConversationEvent::TurnFinal {
                inflight_id: inflight_id.to_string(),
                status,
            })
        });
        self.clear_active_inflight(conversation_id, inflight_id);
        tracing::info!(
            conversation_id,
            inflight_id,
            status = status.as_str(),
            "run ended"
        );
    }

    async fn forward_events(
        self: Arc<Self>,
        conversation_id: String,
        inflight_id: String,
        mut attempts: mpsc::UnboundedReceiver<Attempt>,
    ) {
        while let Some(Attempt { number, mut events }) = attempts.recv().await {
            if number > 1 {
                // Text from the failed attempt is replaced by a fresh snapshot.
                self.hub.publish_conversation_with(&conversation_id, || {
                    self.registry
                        .reset_attempt(&conversation_id, &inflight_id)
                        .map(ConversationEvent::Snapshot)
                });
            }
            while let Some(event) = events.recv().await {
                self.forward_event(&conversation_id, &inflight_id, event);
            }
        }
    }

    fn forward_event(&self, conversation_id: &str, inflight_id: &str, event: ProviderEvent) {
        match event {
            ProviderEvent::Delta(delta) => {
                self.hub.publish_conversation_with(conversation_id, || {
                    self.registry
                        .append_delta(conversation_id, inflight_id, &delta)
                        .then(|| ConversationEvent::AssistantDelta {
                            inflight_id: inflight_id.to_string(),
                            delta,
                        })
                });
            }
            ProviderEvent::Tool(update) => {
                self.hub.publish_conversation_with(conversation_id, || {
                    self.registry
                        .update_tool_state(conversation_id, inflight_id, update)
                        .map(|tool| ConversationEvent::ToolState {
                            inflight_id: inflight_id.to_string(),
                            tool,
                        })
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use huddle_protocol::{ServerBody, ServerFrame};

    use super::*;
    use crate::chat::{BoxFuture, EchoProvider, MemoryConversations, TurnOutput};
    use crate::outbound::OutboundMessage;

    fn coordinator(provider: Option<Arc<dyn ChatProvider>>) -> Arc<RunCoordinator> {
        let config = ServerConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
            },
            ..ServerConfig::default()
        };
        RunCoordinator::from_config(&config, Arc::new(MemoryConversations::new()), provider)
    }

    fn echo() -> Option<Arc<dyn ChatProvider>> {
        Some(Arc::new(EchoProvider::new(Duration::from_millis(5))))
    }

    async fn next_frame(rx: &mut mpsc::Receiver<OutboundMessage>) -> ServerFrame {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("frame in time")
            .expect("queue open");
        ServerFrame::decode(&msg.text).unwrap()
    }

    async fn wait_for_final(rx: &mut mpsc::Receiver<OutboundMessage>) -> (Vec<ServerFrame>, FinalStatus) {
        let mut seen = Vec::new();
        loop {
            let frame = next_frame(rx).await;
            if let ServerBody::TurnFinal { status, .. } = frame.body {
                return (seen, status);
            }
            seen.push(frame);
        }
    }

    /// Fails with a reconnect notice a fixed number of times, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl ChatProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn stream_turn(
            &self,
            request: TurnRequest,
            events: mpsc::Sender<ProviderEvent>,
            _cancel: CancellationToken,
        ) -> BoxFuture<'_, Result<TurnOutput, ProviderError>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let failures = self.failures;
            Box::pin(async move {
                if call <= failures {
                    return Err(ProviderError::Fatal(format!(
                        "Reconnecting... {call}/{failures}"
                    )));
                }
                let _ = events.send(ProviderEvent::Delta(request.prompt.clone())).await;
                Ok(TurnOutput {
                    text: request.prompt,
                })
            })
        }
    }

    /// Ignores cancellation and never finishes on its own.
    struct Stubborn;

    impl ChatProvider for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        fn stream_turn(
            &self,
            _request: TurnRequest,
            _events: mpsc::Sender<ProviderEvent>,
            _cancel: CancellationToken,
        ) -> BoxFuture<'_, Result<TurnOutput, ProviderError>> {
            Box::pin(std::future::pending::<Result<TurnOutput, ProviderError>>())
        }
    }

    /// Streams the prompt, then drops with a reconnect notice on the first
    /// call; later calls stream the prompt and wait for cancellation.
    struct Stutter {
        calls: AtomicU32,
    }

    impl ChatProvider for Stutter {
        fn name(&self) -> &str {
            "stutter"
        }

        fn stream_turn(
            &self,
            request: TurnRequest,
            events: mpsc::Sender<ProviderEvent>,
            cancel: CancellationToken,
        ) -> BoxFuture<'_, Result<TurnOutput, ProviderError>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                let _ = events.send(ProviderEvent::Delta(request.prompt.clone())).await;
                if call == 1 {
                    return Err(ProviderError::Fatal("Reconnecting... 1/3".into()));
                }
                cancel.cancelled().await;
                Err(ProviderError::Cancelled)
            })
        }
    }

    #[tokio::test]
    async fn start_requires_provider_and_live_conversation() {
        let none = coordinator(None);
        none.create_conversation(Some("c1".into()), "t");
        assert!(matches!(
            none.start_run("c1", None, "hi"),
            Err(RunError::ProviderUnavailable)
        ));

        let coord = coordinator(echo());
        match coord.start_run("missing", None, "hi") {
            Err(RunError::Domain(e)) => assert_eq!(e.code.as_str(), "conversation_not_found"),
            other => panic!("unexpected {other:?}"),
        }

        coord.create_conversation(Some("c2".into()), "t");
        coord.archive_conversation("c2").unwrap();
        match coord.start_run("c2", None, "hi") {
            Err(RunError::Domain(e)) => assert_eq!(e.code.as_str(), "conversation_archived"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_run_conflicts_but_same_pair_is_idempotent() {
        let coord = coordinator(Some(Arc::new(EchoProvider::new(Duration::from_secs(60)))));
        coord.create_conversation(Some("c1".into()), "t");

        let first = coord.start_run("c1", Some("i1".into()), "a b").unwrap();
        assert!(first.is_created());
        let again = coord.start_run("c1", Some("i1".into()), "a b").unwrap();
        assert!(!again.is_created());

        match coord.start_run("c1", Some("i2".into()), "x") {
            Err(RunError::Domain(e)) => assert_eq!(e.code.as_str(), "run_in_progress"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(coord.cancel_run("c1", "i1").ok());
    }

    #[tokio::test]
    async fn completed_run_streams_then_finalizes_and_unlocks() {
        let coord = coordinator(echo());
        coord.create_conversation(Some("c1".into()), "t");
        let (tx, mut rx) = mpsc::channel(64);
        let conn = coord.hub().attach(tx);
        conn.subscribe_conversation("c1").unwrap();

        coord.start_run("c1", Some("i1".into()), "hello there").unwrap();
        let (frames, status) = wait_for_final(&mut rx).await;
        assert_eq!(status, FinalStatus::Completed);

        let text: String = frames
            .iter()
            .filter_map(|f| match &f.body {
                ServerBody::AssistantDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "hello there");
        let seqs: Vec<u64> = frames.iter().filter_map(|f| f.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));

        assert!(coord.active_run("c1").is_none());
        assert!(!coord.locks().is_held("c1"));
        assert!(coord.registry().was_finalized("c1", "i1"));
        assert!(coord.start_run("c1", None, "again").is_ok());
    }

    #[tokio::test]
    async fn cancel_broadcasts_once_and_frees_conversation() {
        let coord = coordinator(Some(Arc::new(EchoProvider::new(Duration::from_secs(60)))));
        coord.create_conversation(Some("c1".into()), "t");
        let (tx, mut rx) = mpsc::channel(64);
        let conn = coord.hub().attach(tx);
        conn.subscribe_conversation("c1").unwrap();

        coord.start_run("c1", Some("i1".into()), "slow words").unwrap();
        assert_eq!(coord.cancel_run("c1", "i1"), CancelOutcome::Cancelled);
        assert_eq!(coord.cancel_run("c1", "i1"), CancelOutcome::NotFound);
        assert!(!coord.locks().is_held("c1"));

        let (_, status) = wait_for_final(&mut rx).await;
        assert_eq!(status, FinalStatus::Cancelled);

        tokio::time::sleep(Duration::from_millis(20)).await;
        while let Ok(msg) = rx.try_recv() {
            let frame = ServerFrame::decode(&msg.text).unwrap();
            assert!(!matches!(frame.body, ServerBody::TurnFinal { .. }));
        }
    }

    #[tokio::test]
    async fn next_run_starts_right_after_cancel() {
        let coord = coordinator(Some(Arc::new(Stubborn)));
        coord.create_conversation(Some("c1".into()), "t");

        coord.start_run("c1", Some("i1".into()), "x").unwrap();
        assert!(coord.cancel_run("c1", "i1").ok());
        let next = coord.start_run("c1", Some("i2".into()), "y").unwrap();
        assert!(next.is_created());

        // The first task is still running; it must not free the new hold.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(coord.locks().is_held("c1"));
        match coord.start_run("c1", Some("i3".into()), "z") {
            Err(RunError::Domain(e)) => assert_eq!(e.code.as_str(), "run_in_progress"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(coord.active_run("c1").unwrap().inflight_id, "i2");
    }

    #[tokio::test]
    async fn retry_after_partial_output_restarts_text() {
        let provider = Arc::new(Stutter {
            calls: AtomicU32::new(0),
        });
        let coord = coordinator(Some(provider.clone()));
        coord.create_conversation(Some("c1".into()), "t");
        let (tx, mut rx) = mpsc::channel(64);
        let conn = coord.hub().attach(tx);
        conn.subscribe_conversation("c1").unwrap();

        coord.start_run("c1", Some("i1".into()), "Hello").unwrap();

        let mut bodies = Vec::new();
        while bodies.len() < 3 {
            bodies.push(next_frame(&mut rx).await.body);
        }
        assert!(matches!(&bodies[0], ServerBody::AssistantDelta { delta, .. } if delta == "Hello"));
        match &bodies[1] {
            ServerBody::InflightSnapshot { snapshot } => assert_eq!(snapshot.assistant_text, ""),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&bodies[2], ServerBody::AssistantDelta { delta, .. } if delta == "Hello"));

        assert_eq!(coord.active_run("c1").unwrap().assistant_text, "Hello");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(coord.cancel_run("c1", "i1").ok());
    }

    #[tokio::test]
    async fn delete_is_refused_while_running() {
        let coord = coordinator(Some(Arc::new(Stubborn)));
        coord.create_conversation(Some("c1".into()), "t");
        coord.start_run("c1", Some("i1".into()), "x").unwrap();
        match coord.delete_conversation("c1") {
            Err(e) => assert_eq!(e.code.as_str(), "run_in_progress"),
            Ok(()) => panic!("delete should be refused"),
        }
        assert!(coord.cancel_run("c1", "i1").ok());
        coord.delete_conversation("c1").unwrap();
        assert!(!coord.locks().is_held("c1"));
    }

    #[tokio::test]
    async fn reconnect_notices_are_retried() {
        let flaky = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let coord = coordinator(Some(flaky.clone()));
        coord.create_conversation(Some("c1".into()), "t");
        let (tx, mut rx) = mpsc::channel(64);
        let conn = coord.hub().attach(tx);
        conn.subscribe_conversation("c1").unwrap();

        coord.start_run("c1", Some("i1".into()), "done").unwrap();
        let (_, status) = wait_for_final(&mut rx).await;
        assert_eq!(status, FinalStatus::Completed);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_finalize_as_error() {
        let flaky = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let coord = coordinator(Some(flaky.clone()));
        coord.create_conversation(Some("c1".into()), "t");
        let (tx, mut rx) = mpsc::channel(64);
        let conn = coord.hub().attach(tx);
        conn.subscribe_conversation("c1").unwrap();

        coord.start_run("c1", Some("i1".into()), "x").unwrap();
        let (_, status) = wait_for_final(&mut rx).await;
        assert_eq!(status, FinalStatus::Error);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn sidebar_sees_conversation_lifecycle() {
        let coord = coordinator(echo());
        let (tx, mut rx) = mpsc::channel(64);
        let conn = coord.hub().attach(tx);
        conn.subscribe_sidebar().unwrap();

        coord.create_conversation(Some("c1".into()), "t");
        match next_frame(&mut rx).await.body {
            ServerBody::ConversationUpsert { conversation } => assert_eq!(conversation.id, "c1"),
            other => panic!("unexpected {other:?}"),
        }
        coord.delete_conversation("c1").unwrap();
        match next_frame(&mut rx).await.body {
            ServerBody::ConversationDelete { conversation_id } => assert_eq!(conversation_id, "c1"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(coord.delete_conversation("c1").is_err());
    }
}
