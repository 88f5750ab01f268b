use std::sync::Arc;

use huddle_protocol::ServerFrame;

/// A frame queued for one WebSocket connection.
///
/// The text is encoded once per broadcast and shared by every recipient.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub kind: &'static str,
    pub seq: Option<u64>,
    pub text: Arc<str>,
}

impl OutboundMessage {
    pub fn encode(frame: &ServerFrame) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: frame.body.type_name(),
            seq: frame.seq,
            text: Arc::from(frame.encode()?),
        })
    }
}
