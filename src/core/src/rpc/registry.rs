use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::chat::BoxFuture;
use crate::runs::{DomainError, RunError};

/// Name and version reported by `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Failure of a tool call, translated to a JSON-RPC error by the dispatcher.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    #[error("{message}")]
    InvalidParams {
        message: String,
        details: Option<Value>,
    },

    #[error("Tool not found: {0}")]
    NotFound(String),

    /// A backing execution environment the tool needs is not present.
    #[error("{message}")]
    CapabilityUnavailable { capability: String, message: String },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("{0}")]
    Internal(String),
}

impl ToolError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            details: None,
        }
    }
}

impl From<RunError> for ToolError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Domain(domain) => Self::Domain(domain),
            RunError::ProviderUnavailable => Self::CapabilityUnavailable {
                capability: "chat_provider".into(),
                message: err.to_string(),
            },
        }
    }
}

/// Pluggable tool set served by an [`RpcDispatcher`](super::RpcDispatcher).
pub trait ToolRegistry: Send + Sync {
    fn server_info(&self) -> ServerInfo;

    fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Invoke `name`. The returned value becomes the call's structured content.
    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: Value,
    ) -> BoxFuture<'a, Result<Value, ToolError>>;

    fn list_resources(&self) -> Vec<Value> {
        Vec::new()
    }

    fn list_resource_templates(&self) -> Vec<Value> {
        Vec::new()
    }
}
