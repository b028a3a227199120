use std::time::Duration;

use agent_mcp::config::{McpServerConfig, TransportConfig};
use agent_mcp::protocol::{JsonRpcRequest, McpClient, McpTransport};
use agent_mcp::{McpError, StdioTransport};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const STUB: &str = env!("CARGO_BIN_EXE_mcp-stub-server");

fn spawn_stub(args: &[&str]) -> StdioTransport {
    let config = McpServerConfig {
        shutdown_grace_ms: 500,
        ..McpServerConfig::stdio(STUB, args.iter().map(|a| a.to_string()).collect())
    };
    let TransportConfig::Stdio(stdio) = config.transport().unwrap() else {
        panic!("expected stdio transport");
    };
    StdioTransport::spawn("stub", &stdio).unwrap()
}

async fn initialized_client(args: &[&str]) -> McpClient {
    let client = McpClient::new("stub", Box::new(spawn_stub(args)));
    client.initialize(&CancellationToken::new()).await.unwrap();
    client
}

#[tokio::test]
async fn framed_server_lists_paginated_tools() {
    let client = initialized_client(&["--page-size", "2"]).await;

    let tools = client.list_tools(&CancellationToken::new()).await.unwrap();

    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["ping", "echo", "sleep", "fail", "empty", "probe"]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn newline_server_answers_tool_calls() {
    let client = initialized_client(&["--newline", "--tools", "ping,echo"]).await;
    let cancel = CancellationToken::new();

    let tools = client.list_tools(&cancel).await.unwrap();
    assert_eq!(tools.len(), 2);

    let pong = client.call_tool("ping", json!({}), &cancel).await.unwrap();
    assert_eq!(agent_mcp::render_call_result(&pong), "pong");

    let echoed = client
        .call_tool("echo", json!({"word": "hi"}), &cancel)
        .await
        .unwrap();
    assert_eq!(echoed.structured_content, Some(json!({"word": "hi"})));
    client.close().await.unwrap();
}

#[tokio::test]
async fn server_requests_are_answered() {
    let client = initialized_client(&["--tools", "probe"]).await;

    let result = client
        .call_tool("probe", json!({}), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        agent_mcp::render_call_result(&result),
        "ping answered: true, unknown rejected: true"
    );
    client.close().await.unwrap();
}

#[tokio::test]
async fn cancelled_request_leaves_no_pending_entry() {
    let transport = spawn_stub(&[]);
    let cancelled = CancellationToken::new();
    cancelled.cancel();

    let error = transport
        .request(JsonRpcRequest::new(1, "ping", None), &cancelled)
        .await
        .unwrap_err();

    assert!(matches!(error, McpError::Cancelled));
    assert_eq!(transport.pending_count(), 0);

    let response = transport
        .request(JsonRpcRequest::new(1, "ping", None), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.result, Some(json!({})));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn in_flight_cancel_does_not_confuse_later_requests() {
    let transport = spawn_stub(&[]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let slow = JsonRpcRequest::new(
        1,
        "tools/call",
        Some(json!({"name": "sleep", "arguments": {"ms": 400}})),
    );
    let error = transport.request(slow, &cancel).await.unwrap_err();
    assert!(matches!(error, McpError::Cancelled));
    assert_eq!(transport.pending_count(), 0);

    // The late answer for id 1 arrives first and must be dropped.
    let next = transport
        .request(
            JsonRpcRequest::new(2, "tools/call", Some(json!({"name": "ping", "arguments": {}}))),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(next.id, Some(json!(2)));
    assert_eq!(next.result.unwrap()["content"][0]["text"], "pong");
    transport.close().await.unwrap();
}

// `cat` echoes our requests back; the transport answers the echoed `ping`
// and that answer comes back as the response.
fn spawn_slow_echo() -> StdioTransport {
    let config = McpServerConfig {
        shutdown_grace_ms: 500,
        ..McpServerConfig::stdio("sh", vec!["-c".to_string(), "sleep 1; cat".to_string()])
    };
    let TransportConfig::Stdio(stdio) = config.transport().unwrap() else {
        panic!("expected stdio transport");
    };
    StdioTransport::spawn("slow-echo", &stdio).unwrap()
}

#[tokio::test]
async fn cancel_during_large_write_keeps_framing_intact() {
    let transport = spawn_slow_echo();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    // Larger than a pipe buffer, so the write is still blocked when the
    // token fires.
    let large = JsonRpcRequest::new(1, "ping", Some(json!({"padding": "x".repeat(300_000)})));
    let error = transport.request(large, &cancel).await.unwrap_err();
    assert!(matches!(error, McpError::Cancelled));
    assert_eq!(transport.pending_count(), 0);

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        transport.request(JsonRpcRequest::new(1, "ping", None), &CancellationToken::new()),
    )
    .await
    .expect("follow-up request should not hang")
    .unwrap();
    assert_eq!(response.result, Some(json!({})));
    assert!(transport.is_connected());
    transport.close().await.unwrap();
}

#[tokio::test]
async fn close_fails_outstanding_requests() {
    let transport = std::sync::Arc::new(spawn_stub(&[]));
    let waiting = {
        let transport = std::sync::Arc::clone(&transport);
        tokio::spawn(async move {
            transport
                .request(
                    JsonRpcRequest::new(
                        7,
                        "tools/call",
                        Some(json!({"name": "sleep", "arguments": {"ms": 2000}})),
                    ),
                    &CancellationToken::new(),
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    transport.close().await.unwrap();

    let outcome = waiting.await.unwrap();
    assert!(matches!(outcome, Err(McpError::Disconnected)));
    assert!(!transport.is_connected());

    // Closing twice is fine.
    transport.close().await.unwrap();
    let after = transport
        .request(JsonRpcRequest::new(8, "ping", None), &CancellationToken::new())
        .await;
    assert!(matches!(after, Err(McpError::Disconnected)));
}

#[tokio::test]
async fn missing_binary_is_a_connection_error() {
    let config = McpServerConfig::stdio("/definitely/not/a/real/binary", Vec::new());
    let TransportConfig::Stdio(stdio) = config.transport().unwrap() else {
        panic!("expected stdio transport");
    };

    let error = StdioTransport::spawn("ghost", &stdio).err().unwrap();

    assert!(matches!(error, McpError::Connection(_)));
}
