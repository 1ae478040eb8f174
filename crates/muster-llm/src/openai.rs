use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use muster_core::{ChatRole, MusterError, Result};

use crate::provider::{http_client, retry_after, ChatProvider, ChatRequest};

/// OpenAI chat-completions adapter. Also the base for any
/// OpenAI-compatible endpoint (see [`crate::grok`]).
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    name: &'static str,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            name: "openai",
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

    pub(crate) fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut messages: Vec<serde_json::Value> = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        for m in &request.messages {
            let role = match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            messages.push(serde_json::json!({ "role": role, "content": m.content }));
        }

        let mut body = serde_json::json!({
            "model": &request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if let serde_json::Value::Object(ref extra) = request.extra_params {
            for (k, v) in extra {
                body[k] = v.clone();
            }
        }
        body
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let body = self.build_body(request);
        debug!(provider = self.name, model = %request.model, "sending chat-completions request");

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
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

        data["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MusterError::Provider("empty completion".into()))
    }

    async fn health_check(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| MusterError::Provider(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(MusterError::Provider(format!("HTTP {}", resp.status())))
        }
    }
}
