use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use huddle_protocol::{ConversationEvent, ServerBody, ServerFrame, SidebarEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::outbound::OutboundMessage;
use crate::runs::InflightRegistry;

pub type ConnectionId = Uuid;

/// First sequence number handed out on a fresh topic.
pub const INITIAL_SEQ: u64 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("connection {0} is not attached to the hub")]
    NotAttached(ConnectionId),
}

struct Subscriber {
    tx: mpsc::Sender<OutboundMessage>,
    sidebar: bool,
    conversations: HashSet<String>,
}

struct Topic {
    next_seq: u64,
    members: HashSet<ConnectionId>,
}

impl Topic {
    fn new() -> Self {
        Self {
            next_seq: INITIAL_SEQ,
            members: HashSet::new(),
        }
    }
}

struct HubState {
    connections: HashMap<ConnectionId, Subscriber>,
    sidebar: Topic,
    /// Created on first subscriber, discarded when the last one leaves.
    conversations: HashMap<String, Topic>,
}

impl HubState {
    fn new() -> Self {
        Self {
            connections: HashMap::new(),
            sidebar: Topic::new(),
            conversations: HashMap::new(),
        }
    }
}

/// Publish/subscribe hub with one global sidebar topic and one topic per
/// conversation.
///
/// Sequence assignment and the enqueue to every member happen under the
/// hub mutex, so all members of a topic observe its events in the same
/// strictly increasing `seq` order. Enqueueing never blocks: a full or
/// closed connection queue drops that frame for that connection only.
pub struct EventHub {
    state: Mutex<HubState>,
    registry: Arc<InflightRegistry>,
}

impl EventHub {
    pub fn new(registry: Arc<InflightRegistry>) -> Self {
        Self {
            state: Mutex::new(HubState::new()),
            registry,
        }
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection's outbound queue. Dropping the returned handle
    /// removes the connection from every topic.
    pub fn attach(self: &Arc<Self>, tx: mpsc::Sender<OutboundMessage>) -> HubConnection {
        let id = Uuid::new_v4();
        self.state().connections.insert(
            id,
            Subscriber {
                tx,
                sidebar: false,
                conversations: HashSet::new(),
            },
        );
        tracing::debug!(conn_id = %id, "hub connection attached");
        HubConnection {
            hub: Arc::clone(self),
            id,
        }
    }

    pub fn subscribe_sidebar(&self, conn: ConnectionId) -> Result<(), HubError> {
        let mut state = self.state();
        let subscriber = state
            .connections
            .get_mut(&conn)
            .ok_or(HubError::NotAttached(conn))?;
        subscriber.sidebar = true;
        state.sidebar.members.insert(conn);
        tracing::debug!(conn_id = %conn, "subscribed to sidebar");
        Ok(())
    }

    /// Join a conversation topic. If the conversation has an active run, the
    /// joining connection (only) receives one `inflight_snapshot`. Joining a
    /// topic the connection is already in sends nothing. Returns whether a
    /// snapshot was sent.
    pub fn subscribe_conversation(
        &self,
        conn: ConnectionId,
        conversation_id: &str,
    ) -> Result<bool, HubError> {
        let mut state = self.state();
        let HubState {
            connections,
            conversations,
            ..
        } = &mut *state;

        let subscriber = connections
            .get_mut(&conn)
            .ok_or(HubError::NotAttached(conn))?;
        let joined = subscriber
            .conversations
            .insert(conversation_id.to_string());
        let topic = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(Topic::new);
        topic.members.insert(conn);
        if !joined {
            // Already a member: the live stream is intact, no snapshot.
            return Ok(false);
        }
        tracing::debug!(conn_id = %conn, conversation_id, "subscribed to conversation");

        let Some(snapshot) = self.registry.get_active(conversation_id) else {
            return Ok(false);
        };
        let seq = topic.next_seq;
        let frame = ServerFrame::event(seq, ConversationEvent::Snapshot(snapshot).into_body(conversation_id));
        let msg = match OutboundMessage::encode(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "failed to encode snapshot");
                return Ok(false);
            }
        };
        topic.next_seq += 1;
        deliver(conn, &subscriber.tx, msg);
        Ok(true)
    }

    /// Remove a connection from every topic it joined. Unknown ids are ignored.
    pub fn detach(&self, conn: ConnectionId) {
        let mut state = self.state();
        let Some(subscriber) = state.connections.remove(&conn) else {
            return;
        };
        if subscriber.sidebar {
            state.sidebar.members.remove(&conn);
        }
        for conversation_id in &subscriber.conversations {
            let now_empty = match state.conversations.get_mut(conversation_id) {
                Some(topic) => {
                    topic.members.remove(&conn);
                    topic.members.is_empty()
                }
                None => false,
            };
            if now_empty {
                state.conversations.remove(conversation_id);
            }
        }
        tracing::debug!(conn_id = %conn, "hub connection detached");
    }

    /// Broadcast on the sidebar topic. Returns the assigned `seq`.
    pub fn publish_sidebar(&self, event: SidebarEvent) -> Option<u64> {
        let mut state = self.state();
        let HubState {
            connections,
            sidebar,
            ..
        } = &mut *state;
        broadcast(connections, sidebar, event.into(), "sidebar")
    }

    /// Broadcast on a conversation topic. Returns the assigned `seq`, or
    /// `None` if nobody is subscribed to the conversation.
    pub fn publish_conversation(
        &self,
        conversation_id: &str,
        event: ConversationEvent,
    ) -> Option<u64> {
        self.publish_conversation_with(conversation_id, || Some(event))
    }

    /// Run `produce` and broadcast the event it returns, atomically with
    /// respect to conversation subscriptions: a connection joining the topic
    /// sees either the snapshot taken after `produce` or the event, never a
    /// state that includes the change and the event as well.
    pub fn publish_conversation_with<F>(&self, conversation_id: &str, produce: F) -> Option<u64>
    where
        F: FnOnce() -> Option<ConversationEvent>,
    {
        let mut state = self.state();
        let event = produce()?;
        let HubState {
            connections,
            conversations,
            ..
        } = &mut *state;
        let topic = conversations.get_mut(conversation_id)?;
        broadcast(
            connections,
            topic,
            event.into_body(conversation_id),
            conversation_id,
        )
    }

    pub fn connection_count(&self) -> usize {
        self.state().connections.len()
    }

    pub fn sidebar_subscriber_count(&self) -> usize {
        self.state().sidebar.members.len()
    }

    pub fn conversation_subscriber_count(&self, conversation_id: &str) -> usize {
        self.state()
            .conversations
            .get(conversation_id)
            .map_or(0, |topic| topic.members.len())
    }

    /// Total memberships across all conversation topics.
    pub fn total_conversation_subscribers(&self) -> usize {
        self.state()
            .conversations
            .values()
            .map(|topic| topic.members.len())
            .sum()
    }

    pub fn conversation_topic_count(&self) -> usize {
        self.state().conversations.len()
    }

    /// Forget every connection and topic, restarting all counters.
    pub fn reset(&self) {
        *self.state() = HubState::new();
    }
}

fn broadcast(
    connections: &HashMap<ConnectionId, Subscriber>,
    topic: &mut Topic,
    body: ServerBody,
    label: &str,
) -> Option<u64> {
    let seq = topic.next_seq;
    let frame = ServerFrame::event(seq, body);
    let msg = match OutboundMessage::encode(&frame) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(topic = label, error = %e, "failed to encode event");
            return None;
        }
    };
    topic.next_seq += 1;

    let mut recipients = 0usize;
    for conn in &topic.members {
        if let Some(subscriber) = connections.get(conn) {
            recipients += 1;
            deliver(*conn, &subscriber.tx, msg.clone());
        }
    }
    tracing::debug!(topic = label, kind = msg.kind, seq, recipients, "broadcast event");
    Some(seq)
}

fn deliver(conn: ConnectionId, tx: &mpsc::Sender<OutboundMessage>, msg: OutboundMessage) {
    match tx.try_send(msg) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(msg)) => {
            tracing::warn!(conn_id = %conn, kind = msg.kind, "backpressure: dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(conn_id = %conn, "connection queue closed; awaiting detach");
        }
    }
}

/// A connection's membership in the hub. Detaches on drop.
pub struct HubConnection {
    hub: Arc<EventHub>,
    id: ConnectionId,
}

impl HubConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn subscribe_sidebar(&self) -> Result<(), HubError> {
        self.hub.subscribe_sidebar(self.id)
    }

    pub fn subscribe_conversation(&self, conversation_id: &str) -> Result<bool, HubError> {
        self.hub.subscribe_conversation(self.id, conversation_id)
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}
