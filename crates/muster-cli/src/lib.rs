//! # muster-cli
//!
//! Command-line interface for the muster fleet supervisor.
//!
//! ## Commands
//!
//! - `muster start` — boot the gateway, deploy the fleet, and serve
//! - `muster deploy <spec>` — deploy one declared agent
//! - `muster stop <spec>` — gracefully stop an instance
//! - `muster restart <spec>` — stop then deploy
//! - `muster status [spec]` — instance states
//! - `muster logs <spec>` — log tail
//! - `muster list` — declared specs / live instances

pub mod commands;

pub use commands::Cli;
