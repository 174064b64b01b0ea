//! IPC integration tests: validates codec→dispatch→provider→response round-trip.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use toolbridge::dispatch::{provider_fn, CallContext, Dispatcher};
use toolbridge::ipc::codec::{read_frame, write_frame, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE};
use toolbridge::ipc::{serve_lines, IpcServer, LineProtocol, ServerInfo};
use toolbridge::tools::{Arguments, ParamKind, ParameterSpec, ToolDescriptor};
use toolbridge::types::{DispatchConfig, IpcConfig};

/// Dispatcher with `echo(text)` and `sleep(ms)`.
fn test_dispatcher() -> Arc<Dispatcher> {
    let config = DispatchConfig {
        default_timeout: Duration::from_secs(2),
        ..DispatchConfig::default()
    };
    let dispatcher = Dispatcher::builder(config)
        .register(
            ToolDescriptor::new("echo", "Return the input")
                .param(ParameterSpec::required("text", ParamKind::String, "Text to echo")),
            provider_fn(|args: Arguments, _ctx: CallContext| async move { Ok(args.to_json()) }),
        )
        .unwrap()
        .register(
            ToolDescriptor::new("sleep", "Sleep, then report how long")
                .param(ParameterSpec::required("ms", ParamKind::Integer, "Milliseconds")),
            provider_fn(|args: Arguments, _ctx: CallContext| async move {
                let ms = args.int("ms")?;
                tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                Ok::<Value, toolbridge::dispatch::ProviderError>(json!({ "slept": ms }))
            }),
        )
        .unwrap()
        .build();
    Arc::new(dispatcher)
}

/// Helper: spin up an IpcServer on a random port, return (addr, server_task).
async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let server = IpcServer::new(test_dispatcher(), addr, IpcConfig::default());
        let _ = server.serve_listener(listener).await;
    });

    (addr, handle)
}

async fn send(stream: &mut TcpStream, message: Value) {
    let payload = rmp_serde::to_vec_named(&message).unwrap();
    write_frame(stream, MSG_REQUEST, &payload).await.unwrap();
}

async fn receive(stream: &mut TcpStream) -> (u8, Value) {
    let (msg_type, payload) = read_frame(stream, 5 * 1024 * 1024).await.unwrap().unwrap();
    let response: Value = rmp_serde::from_slice(&payload).unwrap();
    (msg_type, response)
}

/// Helper: send a request frame, receive and decode the response.
async fn round_trip(stream: &mut TcpStream, message: Value) -> (u8, Value) {
    send(stream, message).await;
    receive(stream).await
}

#[tokio::test]
async fn test_echo_round_trip() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) = round_trip(
        &mut stream,
        json!({"id": 1, "tool": "echo", "arguments": {"text": "hi"}}),
    )
    .await;

    assert_eq!(msg_type, MSG_RESPONSE);
    assert_eq!(response, json!({"id": 1, "result": {"text": "hi"}}));
}

#[tokio::test]
async fn test_unknown_tool_returns_client_fault() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) =
        round_trip(&mut stream, json!({"id": 2, "tool": "missing", "arguments": {}})).await;

    assert_eq!(msg_type, MSG_ERROR);
    assert_eq!(response["id"], 2);
    assert_eq!(response["error"]["kind"], "client-fault");
    assert_eq!(response["error"]["retryable"], false);
    assert!(response["error"]["message"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_invalid_arguments_are_reported() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) = round_trip(
        &mut stream,
        json!({"id": "a", "tool": "echo", "arguments": {"text": 5, "extra": true}}),
    )
    .await;

    assert_eq!(msg_type, MSG_ERROR);
    assert_eq!(response["id"], "a");
    let message = response["error"]["message"].as_str().unwrap();
    assert!(message.contains("text"));
    assert!(message.contains("extra"));
}

#[tokio::test]
async fn test_discovery_lists_registration_order() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) = round_trip(&mut stream, json!({"id": 3, "type": "discover"})).await;

    assert_eq!(msg_type, MSG_RESPONSE);
    assert_eq!(response["id"], 3);
    let names: Vec<&str> = response["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["echo", "sleep"]);
}

#[tokio::test]
async fn test_concurrent_requests_complete_out_of_order() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // Slowest first: responses must come back fastest first, matched by id.
    let delays = [300u64, 200, 100, 0];
    for (i, ms) in delays.iter().enumerate() {
        send(&mut stream, json!({"id": i, "tool": "sleep", "arguments": {"ms": ms}})).await;
    }

    let mut by_id = HashMap::new();
    let mut order = Vec::new();
    for _ in 0..delays.len() {
        let (msg_type, response) = receive(&mut stream).await;
        assert_eq!(msg_type, MSG_RESPONSE);
        let id = response["id"].as_u64().unwrap();
        order.push(id);
        by_id.insert(id, response["result"]["slept"].as_u64().unwrap());
    }

    assert_eq!(order, vec![3, 2, 1, 0]);
    for (i, ms) in delays.iter().enumerate() {
        assert_eq!(by_id[&(i as u64)], *ms);
    }
}

#[tokio::test]
async fn test_undecodable_payload_gets_null_id() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // 0xC1 is never valid msgpack
    write_frame(&mut stream, MSG_REQUEST, &[0xC1]).await.unwrap();
    let (msg_type, response) = receive(&mut stream).await;
    assert_eq!(msg_type, MSG_ERROR);
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["kind"], "client-fault");

    // The connection survives.
    let (_, ok) = round_trip(&mut stream, json!({"id": 4, "tool": "echo", "arguments": {"text": "still here"}})).await;
    assert_eq!(ok["result"]["text"], "still here");
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = IpcConfig {
        max_frame_bytes: 64,
        ..IpcConfig::default()
    };
    tokio::spawn(async move {
        let server = IpcServer::new(test_dispatcher(), addr, config);
        let _ = server.serve_listener(listener).await;
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&1024u32.to_be_bytes()).await.unwrap();

    let (msg_type, response) = receive(&mut stream).await;
    assert_eq!(msg_type, MSG_ERROR);
    assert!(response["error"]["message"].as_str().unwrap().contains("too large"));

    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .unwrap();
    assert!(read.is_err() || rest.is_empty());
}

#[tokio::test]
async fn test_responses_flush_before_close() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(&mut stream, json!({"id": 9, "tool": "sleep", "arguments": {"ms": 100}})).await;
    // Half-close: the server sees EOF while the call is still running.
    stream.shutdown().await.unwrap();

    let (_, response) = receive(&mut stream).await;
    assert_eq!(response, json!({"id": 9, "result": {"slept": 100}}));
}

// =============================================================================
// Line transport
// =============================================================================

async fn run_lines(input: String, protocol: LineProtocol) -> Vec<Value> {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let (read_half, write_half) = tokio::io::split(server);
    let serving = tokio::spawn(async move {
        serve_lines(read_half, write_half, test_dispatcher(), protocol, &IpcConfig::default()).await
    });

    client.write_all(input.as_bytes()).await.unwrap();
    client.shutdown().await.unwrap();

    let mut lines = BufReader::new(client).lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await.unwrap() {
        out.push(serde_json::from_str(&line).unwrap());
    }
    serving.await.unwrap().unwrap();
    out
}

#[tokio::test]
async fn test_native_lines_every_request_answered() {
    let mut input = String::new();
    for i in 0..10 {
        input.push_str(&format!(
            "{}\n",
            json!({"id": i, "tool": "sleep", "arguments": {"ms": (10 - i) * 10}})
        ));
    }
    input.push_str("{\"id\": 99, \"type\": \"discover\"}\n");

    let out = run_lines(input, LineProtocol::Native).await;
    assert_eq!(out.len(), 11);
    let mut ids: Vec<u64> = out.iter().map(|m| m["id"].as_u64().unwrap()).collect();
    ids.sort_unstable();
    assert_eq!(ids, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 99]);
}

#[tokio::test]
async fn test_mcp_session() {
    let input = [
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize",
               "params": {"protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": {"name": "t", "version": "0"}}}),
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call",
               "params": {"name": "echo", "arguments": {"text": "hello"}}}),
        json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call",
               "params": {"name": "echo", "arguments": {}}}),
    ]
    .iter()
    .map(|m| format!("{}\n", m))
    .collect::<String>();

    let out = run_lines(input, LineProtocol::Mcp(ServerInfo::new("test-server"))).await;
    assert_eq!(out.len(), 4);
    let by_id: HashMap<u64, &Value> = out.iter().map(|m| (m["id"].as_u64().unwrap(), m)).collect();

    assert_eq!(by_id[&1]["result"]["serverInfo"]["name"], "test-server");
    assert_eq!(by_id[&2]["result"]["tools"].as_array().unwrap().len(), 2);
    assert_eq!(by_id[&3]["result"]["isError"], false);
    assert_eq!(by_id[&4]["result"]["isError"], true);
    assert!(by_id[&4]["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("missing required parameter"));
}
