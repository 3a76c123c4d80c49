// Toolflow — Tool server connection (Model Context Protocol)
// Protocol: https://modelcontextprotocol.io/
//
// The tool server is an external process. We reach it over JSON-RPC 2.0,
// either on the stdio of a child we spawn or by POSTing to an HTTP endpoint.

pub mod http;
pub mod stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{ServerConfig, TransportKind};
use crate::tool::{Tool, ToolRegistry, ToolResult};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Error, Debug)]
pub enum McpError {
    #[error("failed to spawn tool server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tool server I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tool server connection closed")]
    Closed,
    #[error("{method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },
    #[error("tool server error ({code}): {message}")]
    Rpc { code: i32, message: String },
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("tool server returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("invalid JSON from tool server: {0}")]
    Json(#[from] serde_json::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

// ---------------------------------------------------------------------------
// JSON-RPC Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, McpError> {
        match self.error {
            Some(err) => Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// String key for a JSON-RPC id; ids may arrive as numbers or strings.
pub(crate) fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: JsonRpcRequest) -> Result<Value, McpError>;
    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError>;
}

// ---------------------------------------------------------------------------
// MCP Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    json!({"type": "object"})
}

pub struct McpClient {
    name: String,
    transport: Box<dyn Transport>,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(server = %self.name, id = id, method = %method, "JSON-RPC request");
        self.transport
            .request(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: json!(id),
                method: method.to_string(),
                params,
            })
            .await
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.transport
            .notify(JsonRpcNotification {
                jsonrpc: "2.0".to_string(),
                method: method.to_string(),
                params,
            })
            .await
    }

    /// Run the initialize handshake. Returns the server's `serverInfo`.
    pub async fn initialize(&self) -> Result<Value, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "toolflow", "version": crate::VERSION }
        });
        let result = self.call("initialize", params).await?;
        self.notify("notifications/initialized", json!({})).await?;

        let server_info = result.get("serverInfo").cloned().unwrap_or(Value::Null);
        tracing::info!(
            server = %self.name,
            protocol = %result.get("protocolVersion").and_then(|v| v.as_str()).unwrap_or("?"),
            "Tool server initialized"
        );
        Ok(server_info)
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>, McpError> {
        let result = self.call("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| McpError::Protocol("tools/list result has no 'tools'".to_string()))?;
        Ok(serde_json::from_value(tools)?)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: HashMap<String, Value>,
    ) -> Result<ToolResult, McpError> {
        let result = self
            .call("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(tool_result_from(&result))
    }
}

/// Collapse a `tools/call` result into a ToolResult.
///
/// Text parts of `content` are joined; anything else is pretty-printed.
fn tool_result_from(result: &Value) -> ToolResult {
    let Some(content) = result.get("content").and_then(|c| c.as_array()) else {
        return ToolResult::success(serde_json::to_string_pretty(result).unwrap_or_default());
    };

    let text: String = content
        .iter()
        .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    let is_error = result
        .get("isError")
        .and_then(|e| e.as_bool())
        .unwrap_or(false);

    if is_error {
        ToolResult::error(text)
    } else {
        ToolResult::success(text)
    }
}

// ---------------------------------------------------------------------------
// Tool adapter
// ---------------------------------------------------------------------------

pub struct McpTool {
    client: Arc<McpClient>,
    spec: RemoteToolSpec,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, spec: RemoteToolSpec) -> Self {
        Self { client, spec }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters(&self) -> Value {
        self.spec.input_schema.clone()
    }

    async fn execute(&self, args: HashMap<String, Value>) -> ToolResult {
        match self.client.call_tool(&self.spec.name, args).await {
            Ok(result) => result,
            Err(e) => ToolResult::error(format!("tool server call failed: {}", e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Variables a spawned server inherits from this process. Everything else,
/// credentials included, must be passed explicitly.
pub const BASE_ENV: [&str; 12] = [
    "PATH", "HOME", "USER", "LOGNAME", "LANG", "LC_ALL", "TZ", "TMPDIR", "TEMP", "TMP",
    "SYSTEMROOT", "TERM",
];

/// Environment for a spawned server: the base allowlist and `server.pass_env`
/// read through `lookup`, then `server.env`, then the tool credentials.
pub fn server_process_env<F>(
    config: &ServerConfig,
    credentials: &HashMap<String, String>,
    lookup: F,
) -> HashMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env: HashMap<String, String> = BASE_ENV
        .iter()
        .copied()
        .chain(config.pass_env.iter().map(String::as_str))
        .filter_map(|name| lookup(name).map(|v| (name.to_string(), v)))
        .collect();
    env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env.extend(credentials.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// Open a transport to the configured server and run the handshake.
///
/// A stdio server starts from a cleared environment; `credentials` are the
/// only secrets it receives.
pub async fn connect(
    config: &ServerConfig,
    credentials: &HashMap<String, String>,
) -> Result<Arc<McpClient>, McpError> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let (name, transport): (String, Box<dyn Transport>) = match config.transport {
        TransportKind::Stdio => {
            let env = server_process_env(config, credentials, |name| std::env::var(name).ok());
            tracing::info!(
                command = %config.command,
                credential_vars = credentials.len(),
                env_vars = env.len(),
                "Spawning tool server"
            );
            let transport: Box<dyn Transport> = Box::new(stdio::StdioTransport::spawn(
                &config.command,
                &config.args,
                &env,
                timeout,
            )?);
            (config.command.clone(), transport)
        }
        TransportKind::Http => {
            tracing::info!(url = %config.url, "Connecting to tool server");
            let transport: Box<dyn Transport> =
                Box::new(http::HttpTransport::new(&config.url, timeout)?);
            (config.url.clone(), transport)
        }
    };

    let client = Arc::new(McpClient::new(name, transport));
    client.initialize().await?;
    Ok(client)
}

/// Register every tool the server advertises. Returns how many were added.
pub async fn register_server_tools(
    client: Arc<McpClient>,
    registry: &ToolRegistry,
) -> Result<usize, McpError> {
    let specs = client.list_tools().await?;
    let count = specs.len();
    for spec in specs {
        tracing::debug!(server = %client.name(), tool = %spec.name, "Registered server tool");
        registry
            .register(Arc::new(McpTool::new(client.clone(), spec)))
            .await;
    }
    tracing::info!(server = %client.name(), tools = count, "Server tools registered");
    Ok(count)
}
