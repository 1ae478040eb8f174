//! Mock chat and embedding providers for deterministic testing.
//!
//! Responses are queued up front and popped in order; every request is
//! recorded for assertions. No HTTP calls are made.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use muster_core::{MusterError, Result};

use crate::embedding::EmbeddingProvider;
use crate::provider::{ChatProvider, ChatRequest};

/// A queued mock outcome: a reply or an error.
#[derive(Clone)]
enum MockOutcome {
    Text(String),
    Error(String),
    RateLimited(u64),
}

/// A mock chat provider with pre-queued responses.
///
/// # Example
/// ```
/// use muster_llm::mock::MockProvider;
/// let provider = MockProvider::new().with_response("hello back");
/// ```
pub struct MockProvider {
    outcomes: Arc<Mutex<Vec<MockOutcome>>>,
    /// Every request received, for test assertions.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(vec![])),
            requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Queue a text reply.
    pub fn with_response(self, text: &str) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .push(MockOutcome::Text(text.to_string()));
        self
    }

    /// Queue a provider error.
    pub fn with_error(self, msg: &str) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .push(MockOutcome::Error(msg.to_string()));
        self
    }

    /// Queue a 429.
    pub fn with_rate_limit(self, retry_after_secs: u64) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .push(MockOutcome::RateLimited(retry_after_secs));
        self
    }

    /// Requests recorded so far.
    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<ChatRequest>>> {
        Arc::clone(&self.requests)
    }

    /// Number of completion calls made.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_outcome(&self) -> MockOutcome {
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            MockOutcome::Text("(mock: no more queued responses)".into())
        } else {
            outcomes.remove(0)
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        match self.next_outcome() {
            MockOutcome::Text(t) => Ok(t),
            MockOutcome::Error(e) => Err(MusterError::Provider(e)),
            MockOutcome::RateLimited(secs) => Err(MusterError::RateLimited {
                retry_after_secs: secs,
            }),
        }
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Deterministic embedding provider: hashes each text into a unit vector of
/// the configured dimension. Identical texts embed identically, so
/// exact-match queries rank first.
pub struct MockEmbedding {
    dims: usize,
    fail: Arc<Mutex<bool>>,
}

impl MockEmbedding {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            fail: Arc::new(Mutex::new(false)),
        }
    }

    /// Make subsequent embed calls fail with `EmbeddingUnavailable`.
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap() = failing;
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        let mut v = vec![0f32; self.dims];
        for (i, word) in text.split_whitespace().enumerate() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dims;
            let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign / (1.0 + i as f32 * 0.01);
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        } else {
            v[0] = 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if *self.fail.lock().unwrap() {
            return Err(MusterError::EmbeddingUnavailable("mock outage".into()));
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::{ChatMessage, ChatRole};

    fn request() -> ChatRequest {
        let mut r = ChatRequest::new("mock-model");
        r.messages.push(ChatMessage::new(ChatRole::User, "hi"));
        r
    }

    #[tokio::test]
    async fn mock_returns_queued_responses_in_order() {
        let provider = MockProvider::new()
            .with_response("first")
            .with_response("second");
        assert_eq!(provider.complete(&request()).await.unwrap(), "first");
        assert_eq!(provider.complete(&request()).await.unwrap(), "second");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_error_and_rate_limit() {
        let provider = MockProvider::new()
            .with_error("HTTP 500: boom")
            .with_rate_limit(9);
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(crate::is_retryable(&err));
        let err = provider.complete(&request()).await.unwrap_err();
        assert_eq!(err.retry_after_secs(), Some(9));
    }

    #[tokio::test]
    async fn mock_records_requests() {
        let provider = MockProvider::new().with_response("ok");
        let mut req = request();
        req.system = Some("be brief".into());
        let _ = provider.complete(&req).await;
        let recorded = provider.recorded_requests();
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].system.as_deref(), Some("be brief"));
    }

    #[tokio::test]
    async fn mock_embedding_is_deterministic_and_unit_norm() {
        let emb = MockEmbedding::new(64);
        let out = emb.embed(&["alpha beta", "alpha beta"]).await.unwrap();
        assert_eq!(out[0], out[1]);
        let norm: f32 = out[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        emb.set_failing(true);
        assert!(emb.embed(&["x"]).await.is_err());
    }
}
