//! # muster-memory
//!
//! The shared vector memory service: `(agent_id, content, embedding,
//! metadata)` rows with cosine-similarity retrieval scoped by agent. A thin
//! semantic index — no reranking, no chunking, no summarization.

pub mod store;

pub use store::{MemoryHit, MemoryService};
