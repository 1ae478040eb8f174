//! # muster-config
//!
//! Declarative fleet configuration. A single TOML document with three
//! top-level sections — `agents`, `global`, and `secrets_refs` — is loaded
//! once at boot, validated, and frozen. Secrets referenced by name are
//! resolved from the environment into a [`SecretResolver`] that the
//! supervisor passes by value to the components that need them.

pub mod loader;
pub mod schema;
pub mod secrets;

pub use loader::load_config;
pub use schema::{FleetConfig, GlobalConfig};
pub use secrets::SecretResolver;
