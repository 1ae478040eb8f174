use async_trait::async_trait;
use std::time::Duration;

use muster_core::Result;

use crate::openai::OpenAiProvider;
use crate::provider::{ChatProvider, ChatRequest};

/// xAI Grok adapter. Grok speaks the OpenAI chat-completions dialect, so
/// this wraps [`OpenAiProvider`] pointed at the xAI endpoint. Live Search is
/// opt-in through `extra_params.search_parameters`.
pub struct GrokProvider {
    inner: OpenAiProvider,
}

impl GrokProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            inner: OpenAiProvider::new(api_key)
                .with_base_url("https://api.x.ai/v1".into())
                .with_name("grok"),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.inner = self.inner.with_base_url(url);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.inner = self.inner.with_timeout(timeout);
        self
    }
}

#[async_trait]
impl ChatProvider for GrokProvider {
    fn name(&self) -> &str {
        "grok"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.inner.complete(request).await
    }

    async fn health_check(&self) -> Result<()> {
        self.inner.health_check().await
    }
}
