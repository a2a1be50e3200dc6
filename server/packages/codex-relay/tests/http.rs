use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use codex_relay::app::build_router;
use codex_relay::config::RelayConfig;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn app_with(overrides: &[(&str, &str)]) -> Router {
    let config = RelayConfig::from_overrides(
        overrides
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string())),
    );
    build_router(Arc::new(config))
}

async fn send_request(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request handled");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    (status, headers, bytes)
}

async fn post_raw(app: &Router, path: &str, body: impl Into<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .expect("request");
    send_request(app, request).await
}

fn sse_events(bytes: &[u8]) -> Vec<(String, Value)> {
    let text = String::from_utf8_lossy(bytes);
    text.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            let mut event = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event: ") {
                    event = Some(name.to_string());
                } else if let Some(payload) = line.strip_prefix("data: ") {
                    data = Some(serde_json::from_str(payload).expect("sse data json"));
                }
            }
            (event.expect("event line"), data.expect("data line"))
        })
        .collect()
}

fn event_names(events: &[(String, Value)]) -> Vec<&str> {
    events.iter().map(|(name, _)| name.as_str()).collect()
}

fn delta_texts(events: &[(String, Value)]) -> Vec<&str> {
    events
        .iter()
        .filter(|(name, _)| name == "content_block_delta")
        .filter_map(|(_, data)| data["delta"]["text"].as_str())
        .collect()
}

#[tokio::test]
async fn health_reports_config() {
    let app = app_with(&[("CODEX_IDLE_AFTER_TURN_SEC", "4")]);
    let request = Request::builder()
        .method(Method::GET)
        .uri("/health")
        .body(Body::empty())
        .expect("request");
    let (status, _, bytes) = send_request(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&bytes).expect("health json");
    assert_eq!(body["ok"], true);
    assert_eq!(body["env"]["CODEX_IDLE_AFTER_TURN_SEC"], "4");
    assert_eq!(body["env"]["RELAY_PRETTY_LOG"], "1");
    assert!(body["cwd"].as_str().is_some_and(|cwd| !cwd.is_empty()));
    assert!(body["time"].as_str().is_some_and(|time| !time.is_empty()));
}

#[tokio::test]
async fn count_tokens_estimates_from_body_length() {
    let app = app_with(&[]);

    let (status, _, bytes) = post_raw(&app, "/v1/messages/count_tokens", r#"{"messages":[]}"#).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body, json!({ "input_tokens": 32, "output_tokens": 0 }));

    let (status, _, bytes) = post_raw(&app, "/v1/messages/count_tokens", "definitely not json").await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body, json!({ "input_tokens": 128, "output_tokens": 0 }));
}

#[tokio::test]
async fn messages_with_missing_agent_streams_error_and_closes() {
    let app = app_with(&[("CODEX_BIN", "/definitely/not/installed/codex-relay-agent")]);
    let payload = json!({
        "model": "claude-sonnet-4-5",
        "messages": [{ "role": "user", "content": "hello" }]
    });

    let (status, headers, bytes) = post_raw(&app, "/v1/messages", payload.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    let events = sse_events(&bytes);
    assert_eq!(
        event_names(&events),
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
    for (name, data) in &events {
        assert_eq!(data["type"], name.as_str());
    }
    assert_eq!(events[0].1["message"]["role"], "assistant");
    assert_eq!(events[0].1["message"]["model"], "claude-sonnet-4-5");
    assert!(delta_texts(&events)[0].contains("agent not available"));
    assert_eq!(
        events[4].1["usage"],
        json!({ "input_tokens": 0, "output_tokens": 0 })
    );
}

#[cfg(unix)]
#[tokio::test]
async fn messages_stream_agent_output_from_prompt_working_directory() {
    use std::os::unix::fs::PermissionsExt;

    let scratch = tempfile::tempdir().expect("scratch dir");
    let workdir = tempfile::tempdir().expect("work dir");
    let agent = scratch.path().join("fake-codex");
    std::fs::write(
        &agent,
        r#"#!/bin/sh
cat > /dev/null
echo '{"type":"thread.started"}'
echo "{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"cwd=$(pwd -P)\"}}"
echo '{"type":"turn.completed"}'
echo 'warning: slow network' >&2
"#,
    )
    .expect("write fake agent");
    std::fs::set_permissions(&agent, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake agent");

    let agent_path = agent.to_string_lossy().to_string();
    let app = app_with(&[("CODEX_BIN", agent_path.as_str())]);
    let payload = json!({
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": format!("Working directory: {}", workdir.path().display()) },
                { "type": "text", "text": "List the files." }
            ]
        }]
    });

    let (status, _, bytes) = post_raw(&app, "/v1/messages", payload.to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let events = sse_events(&bytes);
    let names = event_names(&events);
    assert_eq!(&names[..2], &["message_start", "content_block_start"]);
    assert_eq!(
        &names[names.len() - 3..],
        &["content_block_stop", "message_delta", "message_stop"]
    );

    let expected_cwd = workdir.path().canonicalize().expect("canonical workdir");
    assert_eq!(
        delta_texts(&events),
        vec![
            "thread.started\n".to_string(),
            format!("cwd={}\n", expected_cwd.display()),
            "[turn.completed]\n".to_string(),
            "\n[Codex stderr]\nwarning: slow network\n".to_string(),
        ]
    );
}

#[tokio::test]
async fn malformed_messages_body_still_streams() {
    let app = app_with(&[("CODEX_BIN", "/definitely/not/installed/codex-relay-agent")]);
    let (status, _, bytes) = post_raw(&app, "/v1/messages", "{oops").await;
    assert_eq!(status, StatusCode::OK);

    let events = sse_events(&bytes);
    assert_eq!(event_names(&events).first(), Some(&"message_start"));
    assert_eq!(event_names(&events).last(), Some(&"message_stop"));
}
