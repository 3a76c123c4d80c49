use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use toolflow::config::{ServerConfig, TransportKind};
use toolflow::mcp::{self, http::HttpTransport, McpClient, McpError};
use toolflow::tool::ToolRegistry;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Minimal JSON-RPC tool server: echoes request ids, answers notifications
/// with 202.
struct RpcServer;

impl Respond for RpcServer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let Some(id) = body.get("id").cloned() else {
            return ResponseTemplate::new(202);
        };
        let response = match body["method"].as_str().unwrap_or("") {
            "initialize" => json!({"jsonrpc": "2.0", "id": id, "result": {
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "mock", "version": "1.0"}
            }}),
            "tools/list" => json!({"jsonrpc": "2.0", "id": id, "result": {"tools": [
                {"name": "echo", "description": "Echo text",
                 "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}},
                {"name": "fail", "description": "Always fails"}
            ]}}),
            "tools/call" => {
                let name = body["params"]["name"].as_str().unwrap_or("");
                let text = body["params"]["arguments"]["text"].as_str().unwrap_or("");
                match name {
                    "echo" => json!({"jsonrpc": "2.0", "id": id, "result": {
                        "content": [{"type": "text", "text": format!("ECHO: {}", text)}]
                    }}),
                    "fail" => json!({"jsonrpc": "2.0", "id": id, "result": {
                        "content": [{"type": "text", "text": "upstream 401"}], "isError": true
                    }}),
                    _ => json!({"jsonrpc": "2.0", "id": id,
                        "error": {"code": -32602, "message": format!("unknown tool {}", name)}}),
                }
            }
            other => json!({"jsonrpc": "2.0", "id": id,
                "error": {"code": -32601, "message": format!("method not found: {}", other)}}),
        };
        ResponseTemplate::new(200).set_body_json(response)
    }
}

async fn start_rpc_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(RpcServer)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_http_transport_roundtrip() {
    let server = start_rpc_server().await;
    let config = ServerConfig {
        transport: TransportKind::Http,
        url: format!("{}/rpc", server.uri()),
        ..ServerConfig::default()
    };

    let client = mcp::connect(&config, &HashMap::new()).await.unwrap();
    let registry = ToolRegistry::new();
    let count = mcp::register_server_tools(client.clone(), &registry)
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(registry.list().await, vec!["echo", "fail"]);

    let mut args = HashMap::new();
    args.insert("text".to_string(), json!("hello"));
    let result = registry.execute("echo", args).await;
    assert!(!result.is_error);
    assert_eq!(result.content, "ECHO: hello");

    let result = registry.execute("fail", HashMap::new()).await;
    assert!(result.is_error);
    assert_eq!(result.content, "upstream 401");
}

#[tokio::test]
async fn test_http_transport_rpc_error() {
    let server = start_rpc_server().await;
    let transport = HttpTransport::new(&format!("{}/rpc", server.uri()), Duration::from_secs(5))
        .unwrap();
    let client = McpClient::new("mock", Box::new(transport));

    let err = client.call("resources/list", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Rpc { code: -32601, .. }));

    let err = client.call_tool("missing", HashMap::new()).await.unwrap_err();
    assert!(matches!(err, McpError::Rpc { code: -32602, .. }));
}

#[tokio::test]
async fn test_http_transport_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let transport =
        HttpTransport::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let client = McpClient::new("down", Box::new(transport));
    let err = client.initialize().await.unwrap_err();
    match err {
        McpError::HttpStatus { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected HttpStatus, got {:?}", other),
    }
}

/// Answers every request with an id other than the one it was sent.
struct WrongIdServer;

impl Respond for WrongIdServer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let id = body.get("id").and_then(|v| v.as_u64()).unwrap_or(0);
        ResponseTemplate::new(200)
            .set_body_json(json!({"jsonrpc": "2.0", "id": id + 100, "result": {}}))
    }
}

#[tokio::test]
async fn test_http_transport_rejects_mismatched_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(WrongIdServer)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let client = McpClient::new("confused", Box::new(transport));
    let err = client.call("tools/list", json!({})).await.unwrap_err();
    match err {
        McpError::Protocol(msg) => assert!(msg.contains("does not match"), "{}", msg),
        other => panic!("expected Protocol, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// stdio
// ---------------------------------------------------------------------------

#[cfg(unix)]
const MOCK_STDIO_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"whoami","description":"Report the GitHub token"}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"%s"}]}}\n' "$id" "$GITHUB_ACCESS_TOKEN|${SLACK_SECRET_TOKEN:-unset}" ;;
    *)
      echo "initializing" >&2
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"sh","version":"0"}}}\n' "$id" ;;
  esac
done
"#;

#[cfg(unix)]
#[tokio::test]
async fn test_stdio_server_receives_credentials() {
    toolflow::logger::init_test();

    let tmp = tempfile::tempdir().unwrap();
    let script = tmp.path().join("server.sh");
    std::fs::write(&script, MOCK_STDIO_SERVER).unwrap();

    let config = ServerConfig {
        transport: TransportKind::Stdio,
        command: "sh".to_string(),
        args: vec![script.to_string_lossy().to_string()],
        request_timeout_secs: 10,
        ..ServerConfig::default()
    };
    // Present in this process but not among the forwarded credentials.
    std::env::set_var("SLACK_SECRET_TOKEN", "xoxb_parent_only");

    let env = toolflow::credentials::server_env_with(["github__whoami"], |name| {
        (name == "GITHUB_ACCESS_TOKEN").then(|| "ghp_test_token".to_string())
    });

    let client = mcp::connect(&config, &env).await.unwrap();
    let registry = ToolRegistry::new();
    mcp::register_server_tools(Arc::clone(&client), &registry)
        .await
        .unwrap();

    let result = registry.execute("whoami", HashMap::new()).await;
    assert!(!result.is_error, "{}", result.content);
    assert_eq!(result.content, "ghp_test_token|unset");
}
