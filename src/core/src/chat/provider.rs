use std::future::Future;
use std::pin::Pin;
use std::sync::LazyLock;

use huddle_protocol::ToolStateUpdate;
use regex::Regex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One turn handed to a provider. Cloned per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub inflight_id: String,
    pub prompt: String,
    /// 1-based attempt number within the retry loop.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TurnOutput {
    pub text: String,
}

/// Streamed progress from a provider turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Delta(String),
    Tool(ToolStateUpdate),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Upstream hiccup; likely to succeed if retried.
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("provider error: {0}")]
    Fatal(String),
    #[error("provider turn cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether the retry driver should try again. Free-text upstream errors
    /// that look like a reconnect notice count as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Fatal(message) => is_reconnect_notice(message),
            Self::Cancelled => false,
        }
    }
}

static RECONNECT_NOTICE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Reconnecting\.\.\.\s*(\d+)/(\d+)").ok());

/// Matches upstream messages such as `Reconnecting... 2/5`.
pub fn is_reconnect_notice(message: &str) -> bool {
    RECONNECT_NOTICE
        .as_ref()
        .is_some_and(|re| re.is_match(message))
}

/// A model backend able to run one streamed turn.
///
/// Implementations push [`ProviderEvent`]s while the turn runs and must
/// return [`ProviderError::Cancelled`] promptly once `cancel` fires.
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    fn stream_turn(
        &self,
        request: TurnRequest,
        events: mpsc::Sender<ProviderEvent>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<TurnOutput, ProviderError>>;
}
