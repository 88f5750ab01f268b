use std::sync::Arc;

use serde_json::{json, Value};

use crate::chat::{BoxFuture, RunCoordinator};
use crate::rpc::{ServerInfo, ToolDescriptor, ToolError, ToolRegistry};

use super::args::ToolArgs;

const CONVERSATION_ID: &[&str] = &["conversationId", "conversation_id"];
const INFLIGHT_ID: &[&str] = &["inflightId", "inflight_id"];

/// Conversation and run control: create/archive/delete conversations,
/// start/cancel runs, query run status.
pub struct ChatTools {
    coordinator: Arc<RunCoordinator>,
}

impl ChatTools {
    pub fn new(coordinator: Arc<RunCoordinator>) -> Self {
        Self { coordinator }
    }

    fn conversation_create(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let title = args
            .get_string("title")?
            .unwrap_or_else(|| "New conversation".to_string());
        let id = args.get_string_any(CONVERSATION_ID)?;
        let summary = self.coordinator.create_conversation(id, &title);
        Ok(json!({ "conversation": summary }))
    }

    fn conversation_archive(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let id = args.require_string_any(CONVERSATION_ID)?;
        let summary = self.coordinator.archive_conversation(&id)?;
        Ok(json!({ "conversation": summary }))
    }

    fn conversation_delete(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let id = args.require_string_any(CONVERSATION_ID)?;
        self.coordinator.delete_conversation(&id)?;
        Ok(json!({ "deleted": true, "conversationId": id }))
    }

    fn chat_start(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let id = args.require_string_any(CONVERSATION_ID)?;
        let prompt = args.require_string_any(&["prompt", "message"])?;
        let inflight_id = args.get_string_any(INFLIGHT_ID)?;
        let registration = self.coordinator.start_run(&id, inflight_id, &prompt)?;
        let snapshot = registration.snapshot();
        Ok(json!({
            "conversationId": snapshot.conversation_id,
            "inflightId": snapshot.inflight_id,
            "created": registration.is_created(),
        }))
    }

    fn chat_cancel(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let id = args.require_string_any(CONVERSATION_ID)?;
        let inflight_id = args.require_string_any(INFLIGHT_ID)?;
        let outcome = self.coordinator.cancel_run(&id, &inflight_id);
        Ok(json!({
            "ok": outcome.ok(),
            "finalizedNow": outcome.finalized_now(),
        }))
    }

    fn chat_status(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let id = args.require_string_any(CONVERSATION_ID)?;
        let mut run = self.coordinator.active_run(&id);
        if args.get_bool("includeText")? == Some(false) {
            if let Some(run) = run.as_mut() {
                run.assistant_text.clear();
            }
        }
        Ok(json!({
            "conversationId": id,
            "active": run.is_some(),
            "locked": self.coordinator.locks().is_held(&id),
            "run": run,
        }))
    }
}

impl ToolRegistry for ChatTools {
    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: "huddle-chat".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    fn list_tools(&self) -> Vec<ToolDescriptor> {
        let conversation_only = json!({
            "type": "object",
            "properties": { "conversationId": { "type": "string" } },
            "required": ["conversationId"],
        });
        vec![
            ToolDescriptor {
                name: "conversation_create".into(),
                description: "Create a conversation, or rename it if the id exists.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "conversationId": { "type": "string" },
                        "title": { "type": "string" },
                    },
                }),
            },
            ToolDescriptor {
                name: "conversation_archive".into(),
                description: "Archive a conversation. Archived conversations reject new runs."
                    .into(),
                input_schema: conversation_only.clone(),
            },
            ToolDescriptor {
                name: "conversation_delete".into(),
                description: "Delete a conversation that has no run in progress.".into(),
                input_schema: conversation_only.clone(),
            },
            ToolDescriptor {
                name: "chat_start".into(),
                description: "Start a chat run. Repeating the same inflightId is idempotent."
                    .into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "conversationId": { "type": "string" },
                        "prompt": { "type": "string" },
                        "inflightId": { "type": "string" },
                    },
                    "required": ["conversationId", "prompt"],
                }),
            },
            ToolDescriptor {
                name: "chat_cancel".into(),
                description: "Cancel an active run.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "conversationId": { "type": "string" },
                        "inflightId": { "type": "string" },
                    },
                    "required": ["conversationId", "inflightId"],
                }),
            },
            ToolDescriptor {
                name: "chat_status".into(),
                description: "Snapshot of the conversation's active run, if any.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "conversationId": { "type": "string" },
                        "includeText": { "type": "boolean" },
                    },
                    "required": ["conversationId"],
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
                "conversation_create" => self.conversation_create(&args),
                "conversation_archive" => self.conversation_archive(&args),
                "conversation_delete" => self.conversation_delete(&args),
                "chat_start" => self.chat_start(&args),
                "chat_cancel" => self.chat_cancel(&args),
                "chat_status" => self.chat_status(&args),
                other => Err(ToolError::NotFound(other.to_string())),
            }
        })
    }

    fn list_resources(&self) -> Vec<Value> {
        self.coordinator
            .directory()
            .list()
            .into_iter()
            .map(|summary| {
                json!({
                    "uri": format!("huddle://conversations/{}", summary.id),
                    "name": summary.title,
                    "mimeType": "application/json",
                })
            })
            .collect()
    }

    fn list_resource_templates(&self) -> Vec<Value> {
        vec![json!({
            "uriTemplate": "huddle://conversations/{conversationId}",
            "name": "conversation",
            "mimeType": "application/json",
        })]
    }
}
