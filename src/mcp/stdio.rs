// Toolflow — stdio transport: newline-delimited JSON-RPC on a child process

use super::{id_key, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpError, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, McpError>>>>>;

pub struct StdioTransport {
    // Held so the child is killed when the transport drops.
    _child: Child,
    tx: mpsc::Sender<String>,
    pending: Pending,
    timeout: Duration,
}

impl StdioTransport {
    /// Spawn the server. The child sees only `env`; nothing is inherited
    /// from this process.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .env_clear()
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("failed to open server stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("failed to open server stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Protocol("failed to open server stderr".to_string()))?;

        let (tx, mut rx) = mpsc::channel::<String>(32);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        // Stdin writer task
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = rx.recv().await {
                if let Err(e) = stdin.write_all(format!("{}\n", msg).as_bytes()).await {
                    tracing::error!("Tool server stdin error: {}", e);
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    tracing::error!("Tool server stdin flush error: {}", e);
                    break;
                }
            }
        });

        // Stdout reader task
        let reader_pending = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                dispatch_line(&line, &reader_pending).await;
            }
            // Server went away: fail everything still waiting.
            for (_, waiter) in reader_pending.lock().await.drain() {
                let _ = waiter.send(Err(McpError::Closed));
            }
        });

        // Stderr logger task
        let name = command.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!("Tool server [{}] stderr: {}", name, line);
            }
        });

        Ok(Self {
            _child: child,
            tx,
            pending,
            timeout,
        })
    }

    async fn send_line(&self, msg: String) -> Result<(), McpError> {
        self.tx.send(msg).await.map_err(|_| McpError::Closed)
    }
}

/// Route one stdout line to the request waiting on its id. Lines that are not
/// responses (server logs, notifications, server-initiated requests) are
/// ignored.
async fn dispatch_line(line: &str, pending: &Pending) {
    let Ok(msg) = serde_json::from_str::<Value>(line) else {
        tracing::trace!(line = %line, "Ignoring non-JSON line from tool server");
        return;
    };
    if let Some(method) = msg.get("method").and_then(|m| m.as_str()) {
        tracing::debug!(method = %method, "Ignoring server-initiated message");
        return;
    }
    if msg.get("result").is_none() && msg.get("error").is_none() {
        tracing::trace!(line = %line, "Ignoring line without result or error");
        return;
    }
    let Ok(resp) = serde_json::from_value::<JsonRpcResponse>(msg) else {
        tracing::trace!(line = %line, "Ignoring malformed response from tool server");
        return;
    };
    let Some(key) = id_key(&resp.id) else {
        return;
    };
    let waiter = pending.lock().await.remove(&key);
    match waiter {
        Some(chan) => {
            let _ = chan.send(resp.into_result());
        }
        None => tracing::warn!(id = %key, "Response for unknown request id"),
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, request: JsonRpcRequest) -> Result<Value, McpError> {
        let key = id_key(&request.id)
            .ok_or_else(|| McpError::Protocol("request id must be a number or string".into()))?;
        let method = request.method.clone();
        let msg = serde_json::to_string(&request)?;

        let (resp_tx, resp_rx) = oneshot::channel();
        self.pending.lock().await.insert(key.clone(), resp_tx);

        if let Err(e) = self.send_line(msg).await {
            self.pending.lock().await.remove(&key);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, resp_rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(McpError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&key);
                Err(McpError::Timeout {
                    method,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        let msg = serde_json::to_string(&notification)?;
        self.send_line(msg).await
    }
}
