use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use muster_core::{ChatRole, MusterError, Result};

use crate::provider::{http_client, retry_after, ChatProvider, ChatRequest};

/// Anthropic Claude API adapter (`POST /v1/messages`).
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.anthropic.com/v1".into(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| {
                let role = match m.role {
                    ChatRole::Assistant => "assistant",
                    _ => "user",
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": &request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });
        if let Some(ref system) = request.system {
            body["system"] = serde_json::json!(system);
        }
        if let serde_json::Value::Object(ref extra) = request.extra_params {
            for (k, v) in extra {
                body[k] = v.clone();
            }
        }
        body
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let body = self.build_body(request);
        debug!(model = %request.model, "sending Anthropic API request");

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| MusterError::Provider(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            if status.as_u16() == 429 {
                return Err(MusterError::RateLimited {
                    retry_after_secs: retry_after(&resp, 30),
                });
            }
            let text = resp.text().await.unwrap_or_default();
            return Err(MusterError::Provider(format!("HTTP {status}: {text}")));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MusterError::Provider(e.to_string()))?;

        let text = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| {
                        if b["type"] == "text" {
                            b["text"].as_str().map(|s| s.to_string())
                        } else {
                            None
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(MusterError::Provider("empty completion".into()));
        }
        Ok(text)
    }

    async fn health_check(&self) -> Result<()> {
        let req = ChatRequest {
            max_tokens: 1,
            messages: vec![muster_core::ChatMessage::new(ChatRole::User, "ping")],
            ..ChatRequest::new("claude-haiku-3-5")
        };
        self.complete(&req).await.map(|_| ())
    }
}
