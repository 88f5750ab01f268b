use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    is_supported_version, ConversationSummary, FinalStatus, InflightSnapshot, ProtocolError,
    ToolCallState, PROTOCOL_VERSION,
};

/// Client → server request carried by a text frame.
///
/// Every request frame looks like
/// `{"protocolVersion":1,"type":"...","requestId":"..."}` plus the
/// type-specific fields below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    SubscribeSidebar,
    SubscribeConversation {
        conversation_id: String,
    },
    CancelInflight {
        conversation_id: String,
        inflight_id: String,
    },
}

impl ClientRequest {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SubscribeSidebar => "subscribe_sidebar",
            Self::SubscribeConversation { .. } => "subscribe_conversation",
            Self::CancelInflight { .. } => "cancel_inflight",
        }
    }
}

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub request_id: Option<String>,
    pub request: ClientRequest,
}

impl ClientMessage {
    /// Encode as a wire frame. Used by clients and tests.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("protocolVersion".into(), Value::from(PROTOCOL_VERSION));
        obj.insert("type".into(), Value::from(self.request.type_name()));
        if let Some(id) = &self.request_id {
            obj.insert("requestId".into(), Value::from(id.as_str()));
        }
        match &self.request {
            ClientRequest::SubscribeSidebar => {}
            ClientRequest::SubscribeConversation { conversation_id } => {
                obj.insert("conversationId".into(), Value::from(conversation_id.as_str()));
            }
            ClientRequest::CancelInflight {
                conversation_id,
                inflight_id,
            } => {
                obj.insert("conversationId".into(), Value::from(conversation_id.as_str()));
                obj.insert("inflightId".into(), Value::from(inflight_id.as_str()));
            }
        }
        Value::Object(obj)
    }
}

/// Decode a client text frame.
///
/// A body that is not JSON fails with [`ProtocolError::InvalidJson`]; any
/// JSON that is not a well-formed request fails with
/// [`ProtocolError::Validation`], carrying the `requestId` if one was present.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let Some(obj) = value.as_object() else {
        return Err(ProtocolError::validation(None, "message must be a JSON object"));
    };

    let request_id = match obj.get("requestId") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(_) => {
            return Err(ProtocolError::validation(
                None,
                "requestId must be a string or number",
            ))
        }
    };

    match obj.get("protocolVersion").and_then(Value::as_u64) {
        Some(v) if is_supported_version(v) => {}
        Some(v) => {
            return Err(ProtocolError::validation(
                request_id,
                format!("unsupported protocolVersion {v}"),
            ))
        }
        None => {
            return Err(ProtocolError::validation(
                request_id,
                "missing or invalid protocolVersion",
            ))
        }
    }

    let Some(kind) = obj.get("type").and_then(Value::as_str) else {
        return Err(ProtocolError::validation(request_id, "missing 'type'"));
    };

    let request = match kind {
        "subscribe_sidebar" => ClientRequest::SubscribeSidebar,
        "subscribe_conversation" => ClientRequest::SubscribeConversation {
            conversation_id: required_str(obj, "conversationId", &request_id)?,
        },
        "cancel_inflight" => ClientRequest::CancelInflight {
            conversation_id: required_str(obj, "conversationId", &request_id)?,
            inflight_id: required_str(obj, "inflightId", &request_id)?,
        },
        other => {
            return Err(ProtocolError::validation(
                request_id,
                format!("unsupported message type '{other}'"),
            ))
        }
    };

    Ok(ClientMessage {
        request_id,
        request,
    })
}

fn required_str(
    obj: &Map<String, Value>,
    field: &str,
    request_id: &Option<String>,
) -> Result<String, ProtocolError> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ProtocolError::validation(request_id.clone(), format!("missing or empty '{field}'"))
        })
}

/// Machine-readable code of an `error` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidJson,
    ValidationError,
    NotFound,
}

/// Server → client frame. `seq` is set on topic events only and is scoped
/// to the topic the event was published on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    pub protocol_version: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub body: ServerBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerBody {
    Ack,
    Error {
        code: ErrorCode,
        message: String,
    },
    ConversationUpsert {
        conversation: ConversationSummary,
    },
    ConversationDelete {
        conversation_id: String,
    },
    InflightSnapshot {
        snapshot: InflightSnapshot,
    },
    AssistantDelta {
        conversation_id: String,
        inflight_id: String,
        delta: String,
    },
    ToolState {
        conversation_id: String,
        inflight_id: String,
        tool: ToolCallState,
    },
    TurnFinal {
        conversation_id: String,
        inflight_id: String,
        status: FinalStatus,
    },
}

impl ServerBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Error { .. } => "error",
            Self::ConversationUpsert { .. } => "conversation_upsert",
            Self::ConversationDelete { .. } => "conversation_delete",
            Self::InflightSnapshot { .. } => "inflight_snapshot",
            Self::AssistantDelta { .. } => "assistant_delta",
            Self::ToolState { .. } => "tool_state",
            Self::TurnFinal { .. } => "turn_final",
        }
    }
}

impl ServerFrame {
    pub fn ack(request_id: Option<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            seq: None,
            request_id,
            body: ServerBody::Ack,
        }
    }

    pub fn error(code: ErrorCode, request_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            seq: None,
            request_id,
            body: ServerBody::Error {
                code,
                message: message.into(),
            },
        }
    }

    pub fn event(seq: u64, body: impl Into<ServerBody>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            seq: Some(seq),
            request_id: None,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Events published on the global sidebar topic.
#[derive(Debug, Clone, PartialEq)]
pub enum SidebarEvent {
    Upsert(ConversationSummary),
    Delete { conversation_id: String },
}

impl From<SidebarEvent> for ServerBody {
    fn from(event: SidebarEvent) -> Self {
        match event {
            SidebarEvent::Upsert(conversation) => ServerBody::ConversationUpsert { conversation },
            SidebarEvent::Delete { conversation_id } => {
                ServerBody::ConversationDelete { conversation_id }
            }
        }
    }
}

/// Events published on a per-conversation topic.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    Snapshot(InflightSnapshot),
    AssistantDelta {
        inflight_id: String,
        delta: String,
    },
    ToolState {
        inflight_id: String,
        tool: ToolCallState,
    },
    TurnFinal {
        inflight_id: String,
        status: FinalStatus,
    },
}

impl ConversationEvent {
    pub fn into_body(self, conversation_id: &str) -> ServerBody {
        let conversation_id = conversation_id.to_string();
        match self {
            Self::Snapshot(snapshot) => ServerBody::InflightSnapshot { snapshot },
            Self::AssistantDelta { inflight_id, delta } => ServerBody::AssistantDelta {
                conversation_id,
                inflight_id,
                delta,
            },
            Self::ToolState { inflight_id, tool } => ServerBody::ToolState {
                conversation_id,
                inflight_id,
                tool,
            },
            Self::TurnFinal {
                inflight_id,
                status,
            } => ServerBody::TurnFinal {
                conversation_id,
                inflight_id,
                status,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_subscribe_conversation() {
        let msg = decode_client_message(
            r#"{"protocolVersion":1,"type":"subscribe_conversation","requestId":"r1","conversationId":"c1"}"#,
        )
        .unwrap();
        assert_eq!(msg.request_id.as_deref(), Some("r1"));
        assert_eq!(
            msg.request,
            ClientRequest::SubscribeConversation {
                conversation_id: "c1".into()
            }
        );
    }

    #[test]
    fn non_json_is_invalid_json() {
        let err = decode_client_message("not json {").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidJson);
        assert!(err.request_id().is_none());
    }

    #[test]
    fn missing_field_is_validation_error_with_request_id() {
        let err = decode_client_message(
            r#"{"protocolVersion":1,"type":"cancel_inflight","requestId":"r7","conversationId":"c1"}"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.request_id(), Some("r7"));
    }

    #[test]
    fn missing_protocol_version_is_rejected() {
        let err = decode_client_message(r#"{"type":"subscribe_sidebar"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err =
            decode_client_message(r#"{"protocolVersion":1,"type":"replay","requestId":5}"#)
                .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.request_id(), Some("5"));
    }

    #[test]
    fn ack_frame_shape() {
        let text = ServerFrame::ack(Some("r1".into())).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"protocolVersion": 1, "type": "ack", "requestId": "r1"})
        );
    }

    #[test]
    fn error_frame_shape() {
        let frame = ServerFrame::error(ErrorCode::NotFound, Some("r2".into()), "no such run");
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "not_found");
        assert_eq!(value["requestId"], "r2");
        assert_eq!(value["message"], "no such run");
        assert!(value.get("seq").is_none());
    }

    #[test]
    fn event_frame_carries_seq_and_camel_case_fields() {
        let body = ConversationEvent::AssistantDelta {
            inflight_id: "i1".into(),
            delta: "hel".into(),
        }
        .into_body("c1");
        let frame = ServerFrame::event(4, body);
        let text = frame.encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "assistant_delta");
        assert_eq!(value["seq"], 4);
        assert_eq!(value["conversationId"], "c1");
        assert_eq!(value["inflightId"], "i1");

        let decoded = ServerFrame::decode(&text).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn client_message_to_json_decodes_back() {
        let msg = ClientMessage {
            request_id: Some("r9".into()),
            request: ClientRequest::CancelInflight {
                conversation_id: "c1".into(),
                inflight_id: "i1".into(),
            },
        };
        let decoded = decode_client_message(&msg.to_json().to_string()).unwrap();
        assert_eq!(decoded, msg);
    }
}
