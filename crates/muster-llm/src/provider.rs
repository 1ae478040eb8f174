use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use muster_core::{ChatMessage, Provider, Result};

/// A request to a chat provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Provider-specific model identifier.
    pub model: String,
    /// System prompt (separate from messages for providers that support it).
    pub system: Option<String>,
    /// Conversation turns, oldest first.
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Provider-specific extras forwarded verbatim into the request body.
    pub extra_params: serde_json::Value,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages: vec![],
            max_tokens: 1024,
            temperature: 0.7,
            extra_params: serde_json::Value::Null,
        }
    }
}

/// Trait implemented by each chat backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable provider name, e.g. "anthropic".
    fn name(&self) -> &str;

    /// Send a request and return the assistant text.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    /// Check that the provider is reachable with the configured credentials.
    async fn health_check(&self) -> Result<()>;
}

/// Build the adapter for a configured provider.
pub fn build_provider(
    provider: Provider,
    api_key: String,
    timeout: Duration,
) -> Arc<dyn ChatProvider> {
    match provider {
        Provider::Grok => Arc::new(crate::grok::GrokProvider::new(api_key).with_timeout(timeout)),
        Provider::Anthropic => {
            Arc::new(crate::anthropic::AnthropicProvider::new(api_key).with_timeout(timeout))
        }
        Provider::Google => {
            Arc::new(crate::google::GoogleProvider::new(api_key).with_timeout(timeout))
        }
        Provider::OpenAi => {
            Arc::new(crate::openai::OpenAiProvider::new(api_key).with_timeout(timeout))
        }
    }
}

/// Shared helper: a reqwest client with a per-call deadline.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Parse a `retry-after` header value in seconds, defaulting when absent.
pub(crate) fn retry_after(resp: &reqwest::Response, default_secs: u64) -> u64 {
    resp.headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| v.ceil() as u64)
        .unwrap_or(default_secs)
}
