use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine-readable codes for conversation-state conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainErrorCode {
    ConversationNotFound,
    ConversationArchived,
    RunInProgress,
}

impl DomainErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConversationNotFound => "conversation_not_found",
            Self::ConversationArchived => "conversation_archived",
            Self::RunInProgress => "run_in_progress",
        }
    }
}

/// Structured domain failure. Serializes as `{"code": "...", "message": "..."}`
/// so each protocol boundary can embed it as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct DomainError {
    pub code: DomainErrorCode,
    pub message: String,
}

impl DomainError {
    pub fn new(code: DomainErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn conversation_not_found(conversation_id: &str) -> Self {
        Self::new(
            DomainErrorCode::ConversationNotFound,
            format!("conversation {conversation_id} does not exist"),
        )
    }

    pub fn conversation_archived(conversation_id: &str) -> Self {
        Self::new(
            DomainErrorCode::ConversationArchived,
            format!("conversation {conversation_id} is archived"),
        )
    }

    pub fn run_in_progress(conversation_id: &str) -> Self {
        Self::new(
            DomainErrorCode::RunInProgress,
            format!("a run is already in progress for conversation {conversation_id}"),
        )
    }
}

/// Failure to start a run.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// No chat provider is configured to execute turns.
    #[error("no chat provider is available")]
    ProviderUnavailable,
}
