//! Tool server handle integration tests
//!
//! Drives real subprocesses through the scripted stdio server in
//! `tests/fixtures/fake_tool_server.sh`.

mod common;

use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::json;

use mcprun::error::RunError;
use mcprun::server::{ServerSpec, ServerState, ToolServer, ToolServerHandle};

use common::{fake_spec, fake_spec_with, handle};

#[tokio::test]
async fn test_handshake_list_and_call() {
    let server = handle(fake_spec("filesystem", &["read_file", "list_directory"]));
    assert_eq!(server.state(), ServerState::NotStarted);

    server.start().await.unwrap();
    assert_eq!(server.state(), ServerState::Ready);

    let tools = server.list_tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["read_file", "list_directory"]);
    assert_eq!(tools[0].description, "read_file tool, listing 1");
    assert_eq!(tools[0].input_schema["type"], "object");

    let output = server.invoke("read_file", json!({"path": "notes.md"})).await.unwrap();
    assert_eq!(output.content, "called read_file");
    assert!(!output.is_error);

    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_tool_level_errors_are_results() {
    let server = handle(fake_spec("tools", &["fail", "reject"]));
    server.start().await.unwrap();

    let failed = server.invoke("fail", json!({})).await.unwrap();
    assert!(failed.is_error);
    assert_eq!(failed.content, "tool failed");

    let rejected = server.invoke("reject", json!({})).await.unwrap();
    assert!(rejected.is_error);
    assert!(rejected.content.contains("-32602"));

    // the server is still usable afterwards
    assert_eq!(server.state(), ServerState::Ready);
    server.stop().await;
}

#[tokio::test]
async fn test_paginated_tool_list() {
    let server = handle(fake_spec_with("paged", &["a", "b", "c"], 0, true));
    server.start().await.unwrap();

    let tools = server.list_tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    // cached listing is identical
    assert_eq!(server.list_tools().await.unwrap(), tools);
    server.stop().await;
}

#[tokio::test]
async fn test_cached_tool_list_is_not_requested_again() {
    let server = handle(fake_spec("cached", &["navigate"]));
    server.start().await.unwrap();

    assert_eq!(server.list_tools().await.unwrap()[0].description, "navigate tool, listing 1");
    assert_eq!(server.list_tools().await.unwrap()[0].description, "navigate tool, listing 1");
    server.stop().await;
}

#[tokio::test]
async fn test_uncached_tool_list_is_requested_each_time() {
    let mut spec = fake_spec("fresh", &["navigate"]);
    spec.cache_tools_list = false;
    let server = handle(spec);
    server.start().await.unwrap();

    assert_eq!(server.list_tools().await.unwrap()[0].description, "navigate tool, listing 1");
    assert_eq!(server.list_tools().await.unwrap()[0].description, "navigate tool, listing 2");
    server.stop().await;
}

/// Answers the handshake, then never reads stdin again
fn deaf_server(name: &str) -> ServerSpec {
    let script = r#"read -r line; printf '{"jsonrpc":"2.0","id":1,"result":{}}\n'; read -r line; sleep 30"#;
    ServerSpec::new(name, "bash")
        .with_args(["-c", script])
        .with_timeouts(Duration::from_secs(10), Duration::from_millis(500))
}

#[tokio::test]
async fn test_call_timeout_covers_blocked_write() {
    let server = handle(deaf_server("deaf"));
    server.start().await.unwrap();

    let blob = "x".repeat(1024 * 1024);
    let began = Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        server.invoke("navigate", json!({ "blob": blob })),
    )
    .await
    .expect("call_timeout must fire before the outer timeout");

    let err = outcome.unwrap_err();
    assert!(matches!(err, RunError::Invocation { .. }));
    assert!(err.to_string().contains("timed out"));
    assert!(began.elapsed() < Duration::from_secs(3));

    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_oversized_line_is_protocol_fault() {
    let script = r#"read -r line; printf '%0200d\n' 0; sleep 30"#;
    let spec = ServerSpec::new("chatty", "bash")
        .with_args(["-c", script])
        .with_timeouts(Duration::from_secs(10), Duration::from_secs(10));
    let server = ToolServerHandle::new(spec).with_max_line_length(64);

    let began = Instant::now();
    let err = server.start().await.unwrap_err();

    assert!(matches!(err, RunError::Launch { ref server, .. } if server == "chatty"));
    assert_eq!(server.state(), ServerState::Failed);
    assert!(began.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_concurrent_calls_matched_by_id() {
    let tools = ["alpha", "beta", "gamma", "delta", "epsilon"];
    let server = handle(fake_spec("many", &tools));
    server.start().await.unwrap();

    let outputs = join_all(tools.iter().map(|t| server.invoke(t, json!({})))).await;
    for (tool, output) in tools.iter().zip(outputs) {
        assert_eq!(output.unwrap().content, format!("called {}", tool));
    }
    server.stop().await;
}

#[tokio::test]
async fn test_crash_is_invocation_error() {
    let server = handle(fake_spec_with("fragile", &["navigate"], 1, false));
    server.start().await.unwrap();

    assert!(server.invoke("navigate", json!({})).await.is_ok());
    let err = server.invoke("navigate", json!({})).await.unwrap_err();
    assert!(matches!(err, RunError::Invocation { ref server, .. } if server == "fragile"));

    // give the reader a moment to observe EOF
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(server.state(), ServerState::Failed);
    assert!(matches!(
        server.invoke("navigate", json!({})).await,
        Err(RunError::Invocation { .. })
    ));

    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_missing_executable_is_launch_error() {
    let server = ToolServerHandle::new(ServerSpec::new("ghost", "no-such-mcp-server-binary"));
    let err = server.start().await.unwrap_err();
    assert!(matches!(err, RunError::Launch { .. }));
    assert_eq!(server.state(), ServerState::Failed);

    server.stop().await;
    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_stop_twice_after_run() {
    let server = handle(fake_spec("fs", &["read_file"]));
    server.start().await.unwrap();
    server.stop().await;
    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.list_tools().await.is_err());
}

#[tokio::test]
async fn test_working_directory_is_applied() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut spec = fake_spec("fs", &["read_file"]);
    spec.cwd = Some(dir.path().to_path_buf());

    let server = handle(spec);
    server.start().await.unwrap();
    assert_eq!(server.list_tools().await.unwrap().len(), 1);
    server.stop().await;
}
