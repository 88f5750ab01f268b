use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use huddle_core::{
    build_router, default_surfaces, ChatProvider, EchoProvider, MemoryConversations,
    RunCoordinator, ServerConfig,
};
use serde_json::{json, Value};
use tower::ServiceExt;

// ── Helpers ──────────────────────────────────────────────────────────

fn app_with(provider: Option<Arc<dyn ChatProvider>>) -> (Router, Arc<RunCoordinator>) {
    let config = ServerConfig::default();
    let coordinator =
        RunCoordinator::from_config(&config, Arc::new(MemoryConversations::new()), provider);
    let app = build_router(config, coordinator.clone(), default_surfaces(&coordinator));
    (app, coordinator)
}

fn slow_echo() -> Option<Arc<dyn ChatProvider>> {
    Some(Arc::new(EchoProvider::new(Duration::from_secs(60))))
}

async fn post_raw(app: &Router, path: &str, body: impl Into<Body>) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn post_json(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let (status, bytes) = post_raw(app, path, body.to_string()).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn tool_call(app: &Router, path: &str, name: &str, arguments: Value) -> Value {
    let (status, body) = post_json(
        app,
        path,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments },
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

// ── /chat/start ──────────────────────────────────────────────────────

#[tokio::test]
async fn start_over_http_shares_the_lock_with_rpc() {
    let (app, coordinator) = app_with(slow_echo());
    coordinator.create_conversation(Some("c1".into()), "t");

    let (status, body) = post_json(
        &app,
        "/chat/start",
        json!({ "conversationId": "c1", "inflightId": "i1", "prompt": "hi" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inflightId"], "i1");
    assert_eq!(body["created"], true);

    let (status, body) = post_json(
        &app,
        "/chat/start",
        json!({ "conversationId": "c1", "inflightId": "i1", "prompt": "hi" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], false);

    let (status, body) = post_json(
        &app,
        "/chat/start",
        json!({ "conversationId": "c1", "prompt": "other" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "run_in_progress");
    assert!(body["message"].is_string());

    let rpc = tool_call(
        &app,
        "/mcp/chat",
        "chat_start",
        json!({ "conversationId": "c1", "prompt": "other" }),
    )
    .await;
    assert_eq!(rpc["error"]["data"]["code"], "run_in_progress");
    coordinator.cancel_run("c1", "i1");
}

#[tokio::test]
async fn start_over_http_maps_conversation_state() {
    let (app, coordinator) = app_with(slow_echo());

    let (status, body) = post_json(
        &app,
        "/chat/start",
        json!({ "conversationId": "missing", "prompt": "hi" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "conversation_not_found");

    coordinator.create_conversation(Some("c2".into()), "t");
    coordinator.archive_conversation("c2").unwrap();
    let (status, body) = post_json(
        &app,
        "/chat/start",
        json!({ "conversationId": "c2", "prompt": "hi" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conversation_archived");

    let (app, coordinator) = app_with(None);
    coordinator.create_conversation(Some("c3".into()), "t");
    let (status, body) = post_json(
        &app,
        "/chat/start",
        json!({ "conversationId": "c3", "prompt": "hi" }),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["capability"], "chat_provider");
}

// ── /chat/cancel ─────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_unknown_pair_is_404() {
    let (app, _) = app_with(slow_echo());
    let (status, body) = post_json(
        &app,
        "/chat/cancel",
        json!({ "conversationId": "c1", "inflightId": "nope" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "not_found" }));
}

#[tokio::test]
async fn cancel_is_ok_again_after_finalize() {
    let (app, coordinator) = app_with(slow_echo());
    coordinator.create_conversation(Some("c1".into()), "t");
    coordinator.start_run("c1", Some("i1".into()), "hi").unwrap();

    let body = json!({ "conversationId": "c1", "inflightId": "i1" });
    let (status, first) = post_json(&app, "/chat/cancel", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, json!({ "status": "ok" }));

    let (status, second) = post_json(&app, "/chat/cancel", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second, json!({ "status": "ok" }));
    assert!(coordinator.active_run("c1").is_none());
}

// ── RPC surfaces ─────────────────────────────────────────────────────

#[tokio::test]
async fn parse_error_body_is_exact() {
    let (app, _) = app_with(None);
    for path in ["/mcp/chat", "/mcp/runs"] {
        let (status, bytes) = post_raw(&app, path, "this is not json").await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "Parse error"}})
        );
    }
}

#[tokio::test]
async fn surfaces_share_dispatch_but_not_tools() {
    let (app, _) = app_with(None);
    let list = json!({ "jsonrpc": "2.0", "id": "x", "method": "tools/list" });

    let (_, chat) = post_json(&app, "/mcp/chat", list.clone()).await;
    let (_, runs) = post_json(&app, "/mcp/runs", list).await;
    let names = |v: &Value| {
        v["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect::<Vec<_>>()
    };
    assert!(names(&chat).contains(&"chat_start".to_string()));
    assert!(names(&runs).contains(&"runs_list".to_string()));
    assert!(!names(&runs).contains(&"chat_start".to_string()));
    assert_eq!(chat["id"], "x");

    let (_, init) = post_json(
        &app,
        "/mcp/runs",
        json!({ "jsonrpc": "2.0", "id": 2, "method": "initialize" }),
    )
    .await;
    assert_eq!(init["result"]["serverInfo"]["name"], "huddle-runs");

    let resp = tool_call(&app, "/mcp/runs", "chat_start", json!({})).await;
    assert_eq!(resp["error"]["code"], -32602);
    assert_eq!(resp["error"]["data"]["code"], "tool_not_found");
}

#[tokio::test]
async fn notification_gets_202_without_body() {
    let (app, _) = app_with(None);
    let (status, bytes) = post_raw(
        &app,
        "/mcp/chat",
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn chat_start_maps_domain_and_capability_errors() {
    let (app, coordinator) = app_with(None);
    coordinator.create_conversation(Some("c1".into()), "t");
    let resp = tool_call(
        &app,
        "/mcp/chat",
        "chat_start",
        json!({ "conversationId": "c1", "prompt": "hi" }),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32001);

    let (app, coordinator) = app_with(slow_echo());
    coordinator.create_conversation(Some("c1".into()), "t");
    coordinator.create_conversation(Some("c2".into()), "t");
    coordinator.archive_conversation("c2").unwrap();

    let started = tool_call(
        &app,
        "/mcp/chat",
        "chat_start",
        json!({ "conversationId": "c1", "prompt": "hi", "inflightId": "i1" }),
    )
    .await;
    assert_eq!(started["result"]["structuredContent"]["created"], true);

    let busy = tool_call(
        &app,
        "/mcp/chat",
        "chat_start",
        json!({ "conversationId": "c1", "prompt": "again", "inflightId": "i2" }),
    )
    .await;
    assert_eq!(busy["error"]["code"], -32000);
    assert_eq!(busy["error"]["data"]["code"], "run_in_progress");

    let archived = tool_call(
        &app,
        "/mcp/chat",
        "chat_start",
        json!({ "conversationId": "c2", "prompt": "hi" }),
    )
    .await;
    assert_eq!(archived["error"]["data"]["code"], "conversation_archived");

    let missing = tool_call(&app, "/mcp/chat", "chat_start", json!({ "prompt": "hi" })).await;
    assert_eq!(missing["error"]["code"], -32602);
    assert_eq!(missing["error"]["data"]["code"], "invalid_params");

    let held = tool_call(&app, "/mcp/runs", "lock_status", json!({})).await;
    assert_eq!(held["result"]["structuredContent"]["held"], json!(["c1"]));
    coordinator.cancel_run("c1", "i1");
}
