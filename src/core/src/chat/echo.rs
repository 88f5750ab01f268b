use std::time::Duration;

use huddle_protocol::ToolStateUpdate;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::provider::{
    BoxFuture, ChatProvider, ProviderError, ProviderEvent, TurnOutput, TurnRequest,
};

/// Deterministic provider that streams the prompt back word by word and
/// reports one synthetic `echo` tool call.
#[derive(Debug, Clone)]
pub struct EchoProvider {
    chunk_delay: Duration,
}

impl EchoProvider {
    pub fn new(chunk_delay: Duration) -> Self {
        Self { chunk_delay }
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new(Duration::from_millis(25))
    }
}

impl ChatProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn stream_turn(
        &self,
        request: TurnRequest,
        events: mpsc::Sender<ProviderEvent>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<TurnOutput, ProviderError>> {
        let delay = self.chunk_delay;
        Box::pin(async move {
            let tool_id = format!("{}-echo", request.inflight_id);
            let emit = |event: ProviderEvent| {
                let events = events.clone();
                let cancel = cancel.clone();
                async move {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                        sent = events.send(event) => sent.map_err(|_| ProviderError::Cancelled),
                    }
                }
            };
            let pause = || {
                let cancel = cancel.clone();
                async move {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                        _ = tokio::time::sleep(delay) => Ok(()),
                    }
                }
            };

            emit(ProviderEvent::Tool(
                ToolStateUpdate::new(&tool_id).name("echo").status("requesting"),
            ))
            .await?;
            emit(ProviderEvent::Tool(
                ToolStateUpdate::new(&tool_id).status("running").stage("streaming"),
            ))
            .await?;

            let mut text = String::new();
            for (n, word) in request.prompt.split_whitespace().enumerate() {
                pause().await?;
                let chunk = if n == 0 {
                    word.to_string()
                } else {
                    format!(" {word}")
                };
                text.push_str(&chunk);
                emit(ProviderEvent::Delta(chunk)).await?;
            }

            emit(ProviderEvent::Tool(
                ToolStateUpdate::new(&tool_id)
                    .status("done")
                    .result(json!({ "words": request.prompt.split_whitespace().count() })),
            ))
            .await?;
            Ok(TurnOutput { text })
        })
    }
}
