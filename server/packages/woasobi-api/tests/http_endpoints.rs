mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use woasobi_api::router::{build_router, AppState};
use woasobi_universal_agent_schema::normalize_commands;

use common::{RuntimeBuilder, ScriptedQuery, StaticProbe};

fn test_app(builder: RuntimeBuilder) -> Router {
    let state = AppState::new(builder.build()).with_codex_models_cache(None);
    build_router(state)
}

async fn send_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request_body = match body {
        Some(body) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };
    let request = builder.body(request_body).expect("build request");
    let response = app.clone().oneshot(request).await.expect("request handled");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    (status, headers, bytes.to_vec())
}

fn parse_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("valid json")
}

/// SSE body with the generated session id replaced by a stable marker.
fn redact_session(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body).to_string();
    let Some(start) = text.find("\"sessionId\":\"") else {
        return text;
    };
    let value_start = start + "\"sessionId\":\"".len();
    let Some(length) = text[value_start..].find('"') else {
        return text;
    };
    format!(
        "{}SESSION{}",
        &text[..value_start],
        &text[value_start + length..]
    )
}

#[tokio::test]
async fn agent_run_without_claude_streams_sentinel() {
    let app = test_app(RuntimeBuilder::new());
    let (status, headers, body) = send_request(
        &app,
        Method::POST,
        "/agent",
        Some(json!({"prompt": "hello"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).and_then(|value| value.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(
        headers.get("x-accel-buffering").and_then(|value| value.to_str().ok()),
        Some("no")
    );
    insta::assert_snapshot!(redact_session(&body).trim_end(), @r###"
    data: {"type":"session","sessionId":"SESSION"}

    data: {"type":"error","message":"__CLAUDE_CODE_NOT_FOUND__"}

    data: {"type":"done"}
    "###);
}

#[tokio::test]
async fn agent_run_streams_claude_events_as_frames() {
    let query = ScriptedQuery::new(vec![json!({
        "type": "assistant",
        "message": {"content": [{"type": "text", "text": "Hi there"}]}
    })]);
    let app = test_app(RuntimeBuilder::new().claude("/bin/claude", Arc::new(query)));
    let (status, _, body) = send_request(
        &app,
        Method::POST,
        "/agent",
        Some(json!({"prompt": "hello", "provider": "claude"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let frames: Vec<Value> = String::from_utf8_lossy(&body)
        .split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(|payload| serde_json::from_str(payload).expect("frame json"))
        .collect();
    let types: Vec<&str> = frames
        .iter()
        .filter_map(|frame| frame["type"].as_str())
        .collect();
    assert_eq!(types, vec!["session", "text", "done"]);
    assert_eq!(frames[1]["content"], "Hi there");
}

#[tokio::test]
async fn blank_prompt_is_rejected_with_problem_details() {
    let app = test_app(RuntimeBuilder::new());
    for body in [json!({}), json!({"prompt": "   "})] {
        let (status, headers, bytes) = send_request(&app, Method::POST, "/agent", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            headers.get(header::CONTENT_TYPE).and_then(|value| value.to_str().ok()),
            Some("application/problem+json")
        );
        let problem = parse_json(&bytes);
        assert_eq!(problem["status"], 400);
        assert!(problem["detail"]
            .as_str()
            .unwrap_or_default()
            .contains("prompt is required"));
    }
}

#[tokio::test]
async fn unknown_provider_is_rejected() {
    let app = test_app(RuntimeBuilder::new());
    let (status, _, _) = send_request(
        &app,
        Method::POST,
        "/agent",
        Some(json!({"prompt": "hi", "provider": "gemini"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send_request(&app, Method::GET, "/agent/commands/gemini", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stopping_unknown_session_is_not_found() {
    let app = test_app(RuntimeBuilder::new());
    let (status, _, bytes) =
        send_request(&app, Method::POST, "/agent/stop/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse_json(&bytes)["status"], 404);
}

#[tokio::test]
async fn stopping_live_session_reports_stopped() {
    let runtime = RuntimeBuilder::new().build();
    let guard = runtime.sessions().open();
    let session_id = guard.id().to_string();
    let token = guard.token().clone();
    let app = build_router(AppState::new(runtime).with_codex_models_cache(None));

    let (status, _, bytes) = send_request(
        &app,
        Method::POST,
        &format!("/agent/stop/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(&bytes), json!({"status": "stopped"}));
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn codex_commands_come_from_the_builtin_table() {
    let app = test_app(RuntimeBuilder::new());
    let (status, _, bytes) = send_request(&app, Method::GET, "/agent/commands/codex", None).await;
    assert_eq!(status, StatusCode::OK);
    let commands = parse_json(&bytes);
    let names: Vec<&str> = commands
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|command| command["name"].as_str())
        .collect();
    assert_eq!(names.len(), 8);
    assert_eq!(names[0], "help");
    assert!(commands[0].get("argumentHint").is_some());
}

#[tokio::test]
async fn claude_commands_merge_discovered_with_builtins() {
    let probe = StaticProbe(Some(normalize_commands(["my-skill", "compact"])));
    let app = test_app(RuntimeBuilder::new().probe(Arc::new(probe)));
    let (status, _, bytes) = send_request(&app, Method::GET, "/agent/commands/claude", None).await;
    assert_eq!(status, StatusCode::OK);
    let commands = parse_json(&bytes);
    assert_eq!(commands[0]["name"], "my-skill");
    assert_eq!(commands[1]["name"], "compact");
    assert_eq!(commands[1]["description"], "Compact conversation context");
    assert_eq!(commands[2]["name"], "help");
}

#[tokio::test]
async fn claude_commands_fall_back_to_builtins_when_discovery_fails() {
    let app = test_app(RuntimeBuilder::new());
    let (status, _, bytes) = send_request(&app, Method::GET, "/agent/commands/claude", None).await;
    assert_eq!(status, StatusCode::OK);
    let commands = parse_json(&bytes);
    assert_eq!(commands[0]["name"], "help");
    assert!(commands.as_array().map(Vec::len).unwrap_or_default() > 20);
}

#[tokio::test]
async fn models_for_non_codex_provider_is_empty() {
    let app = test_app(RuntimeBuilder::new());
    let (status, _, bytes) = send_request(
        &app,
        Method::POST,
        "/agent/models/claude",
        Some(json!({"modelConfig": {"apiKey": "sk-ant"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(&bytes), json!([]));
}

#[tokio::test]
async fn health_reports_cli_availability() {
    let app = test_app(RuntimeBuilder::new().claude("/bin/claude", Arc::new(ScriptedQuery::default())));
    let (status, _, bytes) = send_request(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let health = parse_json(&bytes);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["clis"], json!({"claude": true, "codex": false}));
    assert!(health["uptime"].as_f64().is_some());
    assert!(health["timestamp"].as_str().is_some_and(|ts| ts.ends_with('Z')));
}

#[tokio::test]
async fn root_lists_endpoints_and_openapi_is_served() {
    let app = test_app(RuntimeBuilder::new());
    let (status, _, bytes) = send_request(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    let root = parse_json(&bytes);
    assert_eq!(root["name"], "woasobi-api");
    assert!(root["endpoints"]
        .as_array()
        .expect("endpoints")
        .iter()
        .any(|endpoint| endpoint == "POST /agent"));

    let (status, _, bytes) = send_request(&app, Method::GET, "/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    let document = parse_json(&bytes);
    assert!(document["paths"].get("/agent").is_some());
    assert!(document["paths"].get("/agent/stop/{session_id}").is_some());
}
