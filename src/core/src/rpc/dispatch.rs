use std::sync::Arc;

use huddle_protocol::{
    rpc_codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION,
    MCP_PROTOCOL_VERSION,
};
use serde_json::{json, Map, Value};

use super::registry::{ToolError, ToolRegistry};

/// JSON-RPC 2.0 front end shared by every tool surface.
///
/// Owns envelope validation, method routing, and the mapping from
/// [`ToolError`] to wire errors. The tool set itself is injected.
#[derive(Clone)]
pub struct RpcDispatcher {
    tools: Arc<dyn ToolRegistry>,
}

impl RpcDispatcher {
    pub fn new(tools: Arc<dyn ToolRegistry>) -> Self {
        Self { tools }
    }

    /// Handle a raw request body. Returns `None` for notifications.
    pub async fn handle_body(&self, body: &[u8]) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "rpc parse error");
                return Some(JsonRpcResponse::failure(Value::Null, JsonRpcError::parse_error()));
            }
        };
        match parse_envelope(value) {
            Ok(request) => self.handle(request).await,
            Err((id, error)) => Some(JsonRpcResponse::failure(id, error)),
        }
    }

    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        tracing::debug!(method = %request.method, "rpc request");
        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "resources/list" => Ok(json!({ "resources": self.tools.list_resources() })),
            "resources/listTemplates" => Ok(json!({
                "resourceTemplates": self.tools.list_resource_templates()
            })),
            "tools/list" => Ok(json!({ "tools": self.tools.list_tools() })),
            "tools/call" => self.call_tool(request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        let id = request.id?;
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": {},
            },
            "serverInfo": self.tools.server_info(),
        })
    }

    async fn call_tool(&self, params: Value) -> Result<Value, JsonRpcError> {
        let Value::Object(mut params) = params else {
            return Err(JsonRpcError::invalid_params("params must be an object"));
        };
        let name = match params.remove("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name,
            _ => return Err(JsonRpcError::invalid_params("missing tool name")),
        };
        let arguments = match params.remove("arguments") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(args @ Value::Object(_)) => args,
            Some(_) => return Err(JsonRpcError::invalid_params("arguments must be an object")),
        };

        match self.tools.call_tool(&name, arguments).await {
            Ok(value) => Ok(tool_result(value)),
            Err(err) => {
                tracing::debug!(tool = %name, error = %err, "tool call failed");
                Err(map_tool_error(err))
            }
        }
    }
}

fn tool_result(value: Value) -> Value {
    let text = match &value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": value,
        "isError": false,
    })
}

/// Translate a tool failure into its wire representation.
pub fn map_tool_error(err: ToolError) -> JsonRpcError {
    match err {
        ToolError::InvalidParams { message, details } => {
            let mut data = json!({ "code": "invalid_params" });
            if let Some(details) = details {
                data["details"] = details;
            }
            JsonRpcError::invalid_params(message).with_data(data)
        }
        ToolError::NotFound(name) => {
            JsonRpcError::invalid_params(format!("Tool not found: {name}"))
                .with_data(json!({ "code": "tool_not_found", "tool": name }))
        }
        ToolError::CapabilityUnavailable {
            capability,
            message,
        } => JsonRpcError::new(rpc_codes::CAPABILITY_UNAVAILABLE, message).with_data(json!({
            "code": "capability_unavailable",
            "capability": capability,
        })),
        ToolError::Domain(domain) => {
            let data = serde_json::to_value(&domain).unwrap_or(Value::Null);
            JsonRpcError::new(rpc_codes::DOMAIN_CONFLICT, domain.message).with_data(data)
        }
        ToolError::Internal(message) => {
            tracing::warn!(%message, "tool call internal error");
            JsonRpcError::new(rpc_codes::INTERNAL_ERROR, message)
        }
    }
}

/// Validate the JSON-RPC envelope. On failure, returns the id to answer
/// with (null if none could be extracted) and the error.
fn parse_envelope(value: Value) -> Result<JsonRpcRequest, (Value, JsonRpcError)> {
    let Value::Object(mut obj) = value else {
        return Err((
            Value::Null,
            JsonRpcError::invalid_request("request must be a JSON object"),
        ));
    };

    let id = match obj.remove("id") {
        None => None,
        Some(id @ (Value::String(_) | Value::Number(_) | Value::Null)) => Some(id),
        Some(_) => {
            return Err((
                Value::Null,
                JsonRpcError::invalid_request("id must be a string, number, or null"),
            ))
        }
    };
    let reply_id = id.clone().unwrap_or(Value::Null);

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err((
            reply_id,
            JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
        ));
    }
    let method = match obj.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => method,
        _ => {
            return Err((
                reply_id,
                JsonRpcError::invalid_request("missing method"),
            ))
        }
    };

    Ok(JsonRpcRequest {
        id,
        method,
        params: obj.remove("params").unwrap_or(Value::Null),
    })
}
