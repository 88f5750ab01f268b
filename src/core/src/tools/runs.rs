use std::sync::Arc;

use serde_json::{json, Value};

use crate::chat::{BoxFuture, RunCoordinator};
use crate::rpc::{ServerInfo, ToolDescriptor, ToolError, ToolRegistry};

use super::args::ToolArgs;

/// Read-only view over run coordination state.
pub struct RunTools {
    coordinator: Arc<RunCoordinator>,
}

impl RunTools {
    pub fn new(coordinator: Arc<RunCoordinator>) -> Self {
        Self { coordinator }
    }

    fn runs_list(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let filter = args.get_string_any(&["conversationId", "conversation_id"])?;
        let limit = args.get_usize("limit")?;
        let runs: Vec<_> = self
            .coordinator
            .registry()
            .active_runs()
            .into_iter()
            .filter(|run| filter.as_deref().is_none_or(|id| run.conversation_id == id))
            .take(limit.unwrap_or(usize::MAX))
            .map(|run| {
                json!({
                    "conversationId": run.conversation_id,
                    "inflightId": run.inflight_id,
                    "startedAt": run.started_at,
                    "toolCount": run.tools.len(),
                })
            })
            .collect();
        Ok(json!({ "runs": runs }))
    }

    fn run_snapshot(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let conversation_id = args.require_string_any(&["conversationId", "conversation_id"])?;
        let registry = self.coordinator.registry();
        let snapshot = match args.get_string_any(&["inflightId", "inflight_id"])? {
            Some(inflight_id) => registry.get(&conversation_id, &inflight_id),
            None => registry.get_active(&conversation_id),
        };
        Ok(json!({ "run": snapshot }))
    }

    fn lock_status(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let locks = self.coordinator.locks();
        match args.get_string_any(&["conversationId", "conversation_id"])? {
            Some(id) => Ok(json!({ "conversationId": id, "held": locks.is_held(&id) })),
            None => {
                let mut held = locks.held_ids();
                held.sort();
                Ok(json!({ "held": held }))
            }
        }
    }
}

impl ToolRegistry for RunTools {
    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: "huddle-runs".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    fn list_tools(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "runs_list".into(),
                description: "List active runs, optionally for one conversation.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "conversationId": { "type": "string" },
                        "limit": { "type": "integer", "minimum": 0 },
                    },
                }),
            },
            ToolDescriptor {
                name: "run_snapshot".into(),
                description: "Full state of a run: streamed text and tool calls.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "conversationId": { "type": "string" },
                        "inflightId": { "type": "string" },
                    },
                    "required": ["conversationId"],
                }),
            },
            ToolDescriptor {
                name: "lock_status".into(),
                description: "Which conversations currently hold the run lock.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "conversationId": { "type": "string" } },
                }),
            },
        ]
    }

    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: Value,
    ) -> BoxFuture<'a, Result<Value, ToolError>> {
        Box::pin(async move {
            let args = ToolArgs::new(arguments)?;
            match name {
                "runs_list" => self.runs_list(&args),
                "run_snapshot" => self.run_snapshot(&args),
                "lock_status" => self.lock_status(&args),
                other => Err(ToolError::NotFound(other.to_string())),
            }
        })
    }
}
