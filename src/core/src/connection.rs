use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::Instrument;

use huddle_protocol::{
    decode_client_message, ClientMessage, ClientRequest, ErrorCode, ServerFrame,
};

use crate::chat::RunCoordinator;
use crate::events::HubConnection;
use crate::outbound::OutboundMessage;
use crate::runs::CancelOutcome;

/// Close code sent when a connection has been silent for too long.
pub const IDLE_CLOSE_CODE: u16 = 4000;

/// Parameters required to run a connection session.
#[derive(Clone)]
pub struct ConnectionParams {
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub outbound_capacity: usize,
    pub coordinator: Arc<RunCoordinator>,
}

type WsSink = SplitSink<WebSocket, Message>;

/// Run the connection lifecycle: attach to the hub, then serve requests and
/// forward topic events until the socket closes, errors, or idles out.
/// Every topic membership is dropped on the way out.
pub async fn run_connection(socket: WebSocket, params: ConnectionParams) {
    let (outbound_tx, outbound_rx) = mpsc::channel(params.outbound_capacity.max(1));
    let hub_conn = params.coordinator.hub().attach(outbound_tx);
    let span = tracing::info_span!("conn", id = %hub_conn.id());

    async move {
        tracing::info!("connection opened");
        let (mut sink, mut stream) = socket.split();
        run_message_loop(&mut sink, &mut stream, outbound_rx, &hub_conn, &params).await;
        drop(hub_conn);
        tracing::info!("connection closed");
    }
    .instrument(span)
    .await
}

async fn run_message_loop(
    sink: &mut WsSink,
    stream: &mut SplitStream<WebSocket>,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
    hub_conn: &HubConnection,
    params: &ConnectionParams,
) {
    let idle_timeout = params.idle_timeout;
    let mut idle_deadline = tokio::time::Instant::now() + idle_timeout;
    let mut heartbeat = tokio::time::interval(params.heartbeat_interval);
    heartbeat.tick().await; // consume immediate first tick

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        idle_deadline = tokio::time::Instant::now() + idle_timeout;
                        if !handle_text_message(sink, text.as_str(), hub_conn, &params.coordinator).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        idle_deadline = tokio::time::Instant::now() + idle_timeout;
                        tracing::debug!("binary frame ignored");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        idle_deadline = tokio::time::Instant::now() + idle_timeout;
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        idle_deadline = tokio::time::Instant::now() + idle_timeout;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            tracing::info!(code = %frame.code, reason = %frame.reason, "ws close");
                        } else {
                            tracing::info!("ws close");
                        }
                        break;
                    }
                    None => {
                        tracing::info!("ws stream ended");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("ws error: {e}");
                        break;
                    }
                }
            }
            // Topic events queued by the hub.
            msg = outbound_rx.recv() => {
                let Some(msg) = msg else { break };
                tracing::trace!(kind = msg.kind, seq = ?msg.seq, "event out");
                if sink.send(Message::Text(msg.text.to_string().into())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(idle_deadline) => {
                tracing::info!("idle timeout");
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: IDLE_CLOSE_CODE,
                        reason: "idle timeout".into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

/// Returns false once the socket can no longer be written.
async fn handle_text_message(
    sink: &mut WsSink,
    text: &str,
    hub_conn: &HubConnection,
    coordinator: &RunCoordinator,
) -> bool {
    let ClientMessage {
        request_id,
        request,
    } = match decode_client_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(error = %e, "rejected client frame");
            let frame = ServerFrame::error(e.code(), e.request_id().map(str::to_string), e.to_string());
            return send_frame(sink, &frame).await;
        }
    };
    tracing::debug!(kind = request.type_name(), request_id = ?request_id, "request");

    match request {
        // Membership is in place before the ack is written. Anything the
        // subscription queues (a snapshot, topic events) goes through the
        // outbound queue, which this loop drains only after the ack.
        ClientRequest::SubscribeSidebar => {
            if let Err(e) = hub_conn.subscribe_sidebar() {
                tracing::warn!(error = %e, "sidebar subscribe failed");
            }
            send_frame(sink, &ServerFrame::ack(request_id)).await
        }
        ClientRequest::SubscribeConversation { conversation_id } => {
            match hub_conn.subscribe_conversation(&conversation_id) {
                Ok(snapshot_sent) => {
                    tracing::debug!(%conversation_id, snapshot_sent, "conversation subscribed");
                }
                Err(e) => tracing::warn!(error = %e, "conversation subscribe failed"),
            }
            send_frame(sink, &ServerFrame::ack(request_id)).await
        }
        ClientRequest::CancelInflight {
            conversation_id,
            inflight_id,
        } => {
            let frame = match coordinator.cancel_run(&conversation_id, &inflight_id) {
                CancelOutcome::Cancelled => ServerFrame::ack(request_id),
                CancelOutcome::NotFound => ServerFrame::error(
                    ErrorCode::NotFound,
                    request_id,
                    format!("no active run {inflight_id} in conversation {conversation_id}"),
                ),
            };
            send_frame(sink, &frame).await
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &ServerFrame) -> bool {
    match frame.encode() {
        Ok(json) => sink.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, kind = frame.body.type_name(), "failed to encode frame");
            true
        }
    }
}
