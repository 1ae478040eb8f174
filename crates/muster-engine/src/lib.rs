//! # muster-engine
//!
//! The per-agent conversation engine: one single-writer loop per
//! process-kind agent. Each inbound event runs the same pipeline —
//! admission filters, context assembly, memory recall, a paced provider
//! call, the reply, and memorization — with hard anti-loop guarantees:
//! the self-reply cut-off is unconditional, and `max_turns_per_thread`
//! caps replies per conversation key.

pub mod context;
pub mod engine;
pub mod logfile;
pub mod stats;
pub mod surface;

pub use engine::{ConversationEngine, EngineConfig};
pub use logfile::AgentLog;
pub use stats::EngineStats;
pub use surface::{ChatSurface, EventFeed};
