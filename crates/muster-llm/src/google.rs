use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use muster_core::{ChatRole, MusterError, Result};

use crate::provider::{http_client, retry_after, ChatProvider, ChatRequest};

/// Google AI (Gemini) adapter: `POST models/{model}:generateContent`.
pub struct GoogleProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GoogleProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
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
        // Gemini has no separate system role on this endpoint; the system
        // prompt leads as systemInstruction, turns alternate user/model.
        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::Assistant => "model",
                    _ => "user",
                };
                serde_json::json!({
                    "role": role,
                    "parts": [{ "text": m.content }],
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            }
        });
        if let Some(ref system) = request.system {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{ "text": system }],
            });
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
impl ChatProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let body = self.build_body(request);
        debug!(model = %request.model, "sending Gemini generateContent request");

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, request.model, self.api_key
        );
        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
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

        let text = data["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
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
        let url = format!("{}/models?key={}", self.base_url, self.api_key);
        let resp = self
            .client
            .get(&url)
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
