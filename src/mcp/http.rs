// Toolflow — HTTP transport: one POST per JSON-RPC message

use super::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpError, Transport};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub struct HttpTransport {
    client: Client,
    url: Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, McpError> {
        let url = Url::parse(url)
            .map_err(|e| McpError::Protocol(format!("invalid server url '{}': {}", url, e)))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        body: &T,
        method: &str,
    ) -> Result<reqwest::Response, McpError> {
        let res = self
            .client
            .post(self.url.clone())
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    McpError::Timeout {
                        method: method.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    McpError::Http(e)
                }
            })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(McpError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(res)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: JsonRpcRequest) -> Result<Value, McpError> {
        let res = self.post(&request, &request.method).await?;
        let text = res.text().await?;
        let resp: JsonRpcResponse = serde_json::from_str(&text)?;
        if resp.id != request.id {
            return Err(McpError::Protocol(format!(
                "response id {} does not match request id {}",
                resp.id, request.id
            )));
        }
        resp.into_result()
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        // Servers answer notifications with 202/204 and no body.
        self.post(&notification, &notification.method).await?;
        Ok(())
    }
}
