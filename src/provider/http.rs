// Toolflow — HTTP-based LLM provider (OpenAI-compatible)

use super::*;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Option keys consumed by the provider itself and never sent upstream.
const RETRY_KEYS: [&str; 2] = ["max_retries", "retry_delay_ms"];

/// HTTPProvider speaks the OpenAI-compatible chat completions API.
/// Works with OpenAI, OpenRouter, Groq, vLLM and friends.
pub struct HTTPProvider {
    api_key: String,
    api_base: String,
    client: Client,
    model: String,
}

impl HTTPProvider {
    pub fn new(api_key: String, api_base: String, model: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        let api_base = if api_base.is_empty() {
            default_api_base(&api_key).to_string()
        } else {
            api_base
        };

        Ok(Self {
            api_key,
            api_base,
            client,
            model,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn build_body(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
        options: &HashMap<String, Value>,
    ) -> anyhow::Result<Value> {
        let mut body = json!({
            "model": model,
            "messages": messages,
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        if let Some(obj) = body.as_object_mut() {
            for (k, v) in options {
                if !RETRY_KEYS.contains(&k.as_str()) {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(body)
    }
}

fn default_api_base(api_key: &str) -> &'static str {
    if api_key.starts_with("sk-or-") {
        "https://openrouter.ai/api/v1"
    } else if api_key.starts_with("gsk_") {
        "https://api.groq.com/openai/v1"
    } else {
        "https://api.openai.com/v1"
    }
}

#[async_trait]
impl LLMProvider for HTTPProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
        options: &HashMap<String, Value>,
    ) -> anyhow::Result<LLMResponse> {
        let use_model = if model.is_empty() { &self.model } else { model };
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        let max_retries = options
            .get("max_retries")
            .and_then(|v| v.as_u64())
            .unwrap_or(3) as usize;
        let retry_delay = Duration::from_millis(
            options
                .get("retry_delay_ms")
                .and_then(|v| v.as_u64())
                .unwrap_or(1000),
        );

        let body = self.build_body(messages, tools, use_model, options)?;

        let mut last_error = None;
        for attempt in 0..=max_retries {
            if attempt > 0 {
                tracing::info!(
                    attempt = attempt,
                    delay_ms = retry_delay.as_millis() as u64,
                    "Retrying LLM request"
                );
                tokio::time::sleep(retry_delay).await;
            }

            tracing::debug!(url = %url, model = %use_model, attempt = attempt, "Sending LLM request");

            let res = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match res {
                Ok(response) => {
                    let status = response.status();
                    let text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "could not read body".to_string());

                    if status.is_success() {
                        tracing::debug!(status = %status, body_len = text.len(), "LLM response received");
                        return parse_response(&text);
                    }

                    let is_transient = status.is_server_error() || status.as_u16() == 429;
                    if is_transient && attempt < max_retries {
                        tracing::warn!(status = %status, attempt = attempt, "Transient LLM API error: {}", text);
                        last_error = Some(anyhow::anyhow!("LLM API error ({}): {}", status, text));
                        continue;
                    }
                    anyhow::bail!("LLM API error ({}): {}", status, text);
                }
                Err(e) if attempt < max_retries => {
                    tracing::warn!(error = %e, attempt = attempt, "Network error during LLM request");
                    last_error = Some(anyhow::Error::from(e));
                }
                Err(e) => return Err(anyhow::Error::from(e)),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("LLM request failed after {} attempts", max_retries + 1)
        }))
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

/// Parse an OpenAI-compatible chat completion response.
fn parse_response(body: &str) -> anyhow::Result<LLMResponse> {
    let v: Value = serde_json::from_str(body)?;

    if let Some(err) = v.get("error") {
        let msg = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        anyhow::bail!("LLM API error: {}", msg);
    }

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow::anyhow!("No choices in LLM response"))?;

    let message = choice
        .get("message")
        .ok_or_else(|| anyhow::anyhow!("No message in choice"))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .unwrap_or("stop")
        .to_string();

    let tool_calls: Vec<ToolCall> = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    let usage = v
        .get("usage")
        .and_then(|u| serde_json::from_value::<UsageInfo>(u.clone()).ok());

    Ok(LLMResponse {
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        finish_reason,
        usage,
    })
}

fn parse_tool_call(tc: &Value) -> Option<ToolCall> {
    let func = tc.get("function")?;
    let name = func.get("name").and_then(|n| n.as_str())?;
    let id = tc.get("id").and_then(|i| i.as_str()).unwrap_or("");
    let arguments = match func.get("arguments") {
        Some(Value::String(s)) => s.clone(),
        // Some servers send the object itself instead of an encoded string
        Some(other @ Value::Object(_)) => other.to_string(),
        _ => "{}".to_string(),
    };
    Some(ToolCall::new(id, name, arguments))
}
