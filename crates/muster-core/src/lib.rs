//! # muster-core
//!
//! Core types, errors, and state machines for the muster agent fleet.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace: agent specifications, inbound events, and the error taxonomy.

pub mod error;
pub mod event;
pub mod spec;
pub mod state;

pub use error::{MusterError, Result};
pub use event::{AttachmentInfo, ChannelMessage, ChatMessage, ChatRole, InboundEvent};
pub use spec::{AgentKind, AgentSpec, BehaviorConfig, LlmConfig, MountSpec, Provider, ResourceConfig};
pub use state::{ConnectionState, InstanceState};
