//! # muster-llm
//!
//! Provider adapters for the language models and embedding endpoints muster
//! agents talk to. Four chat backends (grok, anthropic, google, openai) sit
//! behind one [`ChatProvider`] trait; embeddings sit behind
//! [`EmbeddingProvider`]. The conversation engine owns retry policy; this
//! crate only classifies which failures are worth retrying.

pub mod anthropic;
pub mod embedding;
pub mod google;
pub mod grok;
pub mod mock;
pub mod openai;
pub mod provider;

pub use embedding::{EmbeddingProvider, OpenAiEmbedding};
pub use provider::{build_provider, ChatProvider, ChatRequest};

use muster_core::MusterError;

/// Whether an error from a provider call is transient and worth one retry.
pub fn is_retryable(err: &MusterError) -> bool {
    match err {
        MusterError::RateLimited { .. } => true,
        MusterError::Provider(msg) | MusterError::Transport(msg) => {
            msg.starts_with("HTTP 429")
                || msg.starts_with("HTTP 500")
                || msg.starts_with("HTTP 502")
                || msg.starts_with("HTTP 503")
                || msg.starts_with("HTTP 529")
                || msg.contains("timed out")
                || msg.contains("connection reset")
                || msg.contains("connection closed")
                || msg.contains("overloaded")
        }
        _ => false,
    }
}
