use thiserror::Error;

use crate::ErrorCode;

/// Failure to turn a client text frame into a [`ClientRequest`](crate::ClientRequest).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame body is not JSON at all.
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The frame is JSON but the envelope or its fields are unusable.
    #[error("{message}")]
    Validation {
        request_id: Option<String>,
        message: String,
    },
}

impl ProtocolError {
    pub fn validation(request_id: Option<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            request_id,
            message: message.into(),
        }
    }

    /// Wire code reported in the `error` frame.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidJson(_) => ErrorCode::InvalidJson,
            Self::Validation { .. } => ErrorCode::ValidationError,
        }
    }

    /// Request id recovered from the frame, when it got far enough to have one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::InvalidJson(_) => None,
            Self::Validation { request_id, .. } => request_id.as_deref(),
        }
    }
}
