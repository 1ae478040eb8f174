use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use muster_core::{AgentKind, AgentSpec};

/// Root configuration — maps to `muster.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetConfig {
    /// Map of spec id → agent declaration. BTreeMap keeps resolved output
    /// deterministic: loading the same file twice yields an identical fleet.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentSpec>,
    #[serde(default)]
    pub global: GlobalConfig,
    /// Names of environment variables that must be present at startup
    /// (Discord tokens, provider API keys, memory backend password).
    #[serde(default)]
    pub secrets_refs: Vec<String>,
}

/// Fleet-wide timeouts, paths, and tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// Directory receiving one subdirectory of rotating logs per agent.
    pub log_root: PathBuf,
    /// Listen address for the gateway HTTP surface.
    pub gateway_listen: String,
    /// Path to the shared vector memory database.
    pub memory_db_path: PathBuf,
    /// Embedding dimension; must match the embedding model's output.
    pub embedding_dims: usize,
    /// Health probe cadence.
    pub probe_interval_secs: u64,
    /// Deadline for `starting → running`.
    pub startup_timeout_secs: u64,
    /// Per-call deadlines for external services.
    pub llm_timeout_secs: u64,
    pub embedding_timeout_secs: u64,
    pub gateway_timeout_secs: u64,
    /// Bounded fan-out buffer per subscription; overflow drops oldest.
    pub event_buffer: usize,
    /// Automatic restarts allowed within `restart_window_secs` before an
    /// instance is marked failed.
    pub restart_budget: u32,
    pub restart_window_secs: u64,
    /// Idle conversation state is evicted after this long.
    pub idle_eviction_secs: u64,
    /// Pull container images that are missing locally instead of erroring.
    pub pull_missing_images: bool,
    /// Named docker network shared by the gateway and container agents.
    pub container_network: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_root: PathBuf::from("logs"),
            gateway_listen: "127.0.0.1:9091".into(),
            memory_db_path: PathBuf::from("memory.db"),
            embedding_dims: 1536,
            probe_interval_secs: 60,
            startup_timeout_secs: 30,
            llm_timeout_secs: 60,
            embedding_timeout_secs: 10,
            gateway_timeout_secs: 30,
            event_buffer: 256,
            restart_budget: 3,
            restart_window_secs: 60,
            idle_eviction_secs: 3600,
            pull_missing_images: false,
            container_network: "muster-net".into(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            agents: BTreeMap::new(),
            global: GlobalConfig::default(),
            secrets_refs: vec![],
        }
    }
}

impl FleetConfig {
    /// Structural validation, run once after parsing. Returns every problem
    /// found rather than stopping at the first.
    pub fn validate(&self) -> Result<(), String> {
        let mut errors: Vec<String> = Vec::new();

        for (id, spec) in &self.agents {
            if id.is_empty() {
                errors.push("agents: empty spec id".into());
            }
            if spec.discord_token_ref.is_empty() {
                errors.push(format!("agents.{id}: discord_token_ref is empty"));
            }
            if spec.llm.model.is_empty() {
                errors.push(format!("agents.{id}: llm.model is empty"));
            }
            match spec.kind {
                AgentKind::Process => {
                    if spec.resources.is_some() {
                        errors.push(format!(
                            "agents.{id}: process agents must not carry [agents.{id}.resources]"
                        ));
                    }
                }
                AgentKind::Container => match spec.resources {
                    None => errors.push(format!(
                        "agents.{id}: container agents require [agents.{id}.resources]"
                    )),
                    Some(ref res) => {
                        if res.image.is_empty() {
                            errors.push(format!("agents.{id}: resources.image is empty"));
                        }
                        if res.workspace_host_path.as_os_str().is_empty() {
                            errors.push(format!(
                                "agents.{id}: resources.workspace_host_path is empty"
                            ));
                        }
                    }
                },
            }
            if !spec.behavior.bot_allowlist.is_empty() && !spec.behavior.ignore_bots {
                // Documented no-op, not an error: the allowlist only gates
                // bot traffic when ignore_bots is on.
                tracing::warn!(
                    agent = %id,
                    "bot_allowlist has no effect while ignore_bots = false"
                );
            }
            if !self.secrets_refs.contains(&spec.discord_token_ref) {
                errors.push(format!(
                    "agents.{id}: discord_token_ref '{}' is not listed in secrets_refs",
                    spec.discord_token_ref
                ));
            }
        }

        if self.global.embedding_dims == 0 {
            errors.push("global.embedding_dims must be non-zero".into());
        }
        if self.global.event_buffer == 0 {
            errors.push("global.event_buffer must be non-zero".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n  - "))
        }
    }
}
