use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use huddle_protocol::JsonRpcResponse;

use crate::chat::RunCoordinator;
use crate::config::ServerConfig;
use crate::connection::{run_connection, ConnectionParams};
use crate::rpc::{RpcDispatcher, ToolRegistry};
use crate::runs::{CancelOutcome, DomainError, DomainErrorCode, RunError};
use crate::tools::{ChatTools, RunTools};

/// Shared state accessible by handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub config: ServerConfig,
    pub coordinator: Arc<RunCoordinator>,
}

/// A JSON-RPC tool surface mounted at `path`.
#[derive(Clone)]
pub struct RpcSurface {
    pub path: String,
    pub dispatcher: RpcDispatcher,
}

impl RpcSurface {
    pub fn new(path: impl Into<String>, tools: Arc<dyn ToolRegistry>) -> Self {
        Self {
            path: path.into(),
            dispatcher: RpcDispatcher::new(tools),
        }
    }
}

/// `/mcp/chat` (conversation and run control) and `/mcp/runs` (run
/// inspection), both over the same coordinator.
pub fn default_surfaces(coordinator: &Arc<RunCoordinator>) -> Vec<RpcSurface> {
    vec![
        RpcSurface::new("/mcp/chat", Arc::new(ChatTools::new(Arc::clone(coordinator)))),
        RpcSurface::new("/mcp/runs", Arc::new(RunTools::new(Arc::clone(coordinator)))),
    ]
}

/// Build the axum router.
///
/// Routes: `/ws` (WebSocket upgrade), `/health`, `POST /chat/start`,
/// `POST /chat/cancel`, and one `POST` route per RPC surface.
pub fn build_router(
    config: ServerConfig,
    coordinator: Arc<RunCoordinator>,
    surfaces: Vec<RpcSurface>,
) -> Router {
    let state = AppState {
        config,
        coordinator,
    };

    let mut router = Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .route("/chat/start", post(start_chat))
        .route("/chat/cancel", post(cancel_chat));

    for surface in surfaces {
        tracing::debug!(path = %surface.path, "mounting rpc surface");
        let dispatcher = surface.dispatcher;
        router = router.route(
            &surface.path,
            post(move |body: Bytes| {
                let dispatcher = dispatcher.clone();
                async move { rpc_response(dispatcher.handle_body(&body).await) }
            }),
        );
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let params = ConnectionParams {
        heartbeat_interval: state.config.heartbeat_interval,
        idle_timeout: state.config.idle_timeout,
        outbound_capacity: state.config.outbound_capacity,
        coordinator: state.coordinator.clone(),
    };
    ws.on_upgrade(move |socket| run_connection(socket, params))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartBody {
    conversation_id: String,
    #[serde(default)]
    inflight_id: Option<String>,
    prompt: String,
}

/// Start a run. Starting the pair that is already running returns it again
/// with `created: false`.
async fn start_chat(State(state): State<AppState>, Json(body): Json<StartBody>) -> Response {
    match state
        .coordinator
        .start_run(&body.conversation_id, body.inflight_id, &body.prompt)
    {
        Ok(registration) => {
            let created = registration.is_created();
            let snapshot = registration.snapshot();
            (
                StatusCode::OK,
                Json(json!({
                    "conversationId": snapshot.conversation_id,
                    "inflightId": snapshot.inflight_id,
                    "created": created,
                })),
            )
                .into_response()
        }
        Err(RunError::Domain(error)) => domain_error_response(&error),
        Err(RunError::ProviderUnavailable) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "capability_unavailable",
                "capability": "chat_provider",
            })),
        )
            .into_response(),
    }
}

fn domain_error_response(error: &DomainError) -> Response {
    let status = match error.code {
        DomainErrorCode::ConversationNotFound => StatusCode::NOT_FOUND,
        DomainErrorCode::ConversationArchived | DomainErrorCode::RunInProgress => {
            StatusCode::CONFLICT
        }
    };
    tracing::debug!(code = error.code.as_str(), "http domain error");
    (
        status,
        Json(json!({ "error": error.code.as_str(), "message": error.message })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelBody {
    conversation_id: String,
    inflight_id: String,
}

/// Cancel succeeds for an active run and, idempotently, for one that
/// finalized recently.
async fn cancel_chat(State(state): State<AppState>, Json(body): Json<CancelBody>) -> Response {
    let coordinator = &state.coordinator;
    let outcome = coordinator.cancel_run(&body.conversation_id, &body.inflight_id);
    let ok = match outcome {
        CancelOutcome::Cancelled => true,
        CancelOutcome::NotFound => coordinator
            .registry()
            .was_finalized(&body.conversation_id, &body.inflight_id),
    };
    tracing::info!(
        conversation_id = %body.conversation_id,
        inflight_id = %body.inflight_id,
        ok,
        "http cancel"
    );
    if ok {
        (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found" }))).into_response()
    }
}

fn rpc_response(response: Option<JsonRpcResponse>) -> Response {
    match response {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}
