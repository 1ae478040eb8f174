use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How an agent is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Conversation loop supervised as an in-process task.
    Process,
    /// Long-lived containerized development environment.
    Container,
}

/// Which language-model backend an agent talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Grok,
    Anthropic,
    Google,
    OpenAi,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Provider::Grok => "grok",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::OpenAi => "openai",
        };
        f.write_str(s)
    }
}

/// Language-model selection for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: Provider,
    /// Provider-specific model identifier, e.g. "grok-2-1212".
    pub model: String,
    /// Extra request parameters forwarded verbatim to the provider adapter.
    #[serde(default)]
    pub extra_params: serde_json::Value,
}

/// Per-agent conversation behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BehaviorConfig {
    /// Recent messages fetched from Discord for context. 0 = no history block.
    pub max_context_messages: usize,
    /// Hard cap on replies by this agent per conversation key.
    pub max_turns_per_thread: u32,
    /// Pacing delay before each LM call.
    pub response_delay_seconds: f64,
    /// Ignore messages from other bots unless allowlisted.
    pub ignore_bots: bool,
    /// Author ids of bots this agent is allowed to talk to. Only consulted
    /// when `ignore_bots` is true.
    pub bot_allowlist: Vec<String>,
    /// Channels this agent replies in. Empty = all channels.
    pub channel_allowlist: Vec<String>,
    /// Only reply when the agent's bot identity is mentioned.
    pub require_mention: bool,
    /// Post an online announcement on deploy.
    pub announce_on_start: bool,
    /// Minimum cosine similarity for a memory to enter the prompt.
    pub memory_similarity_floor: f32,
    /// Spawn a new thread from the triggering message instead of replying
    /// in place.
    pub create_thread_on_reply: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            max_context_messages: 20,
            max_turns_per_thread: 30,
            response_delay_seconds: 2.0,
            ignore_bots: true,
            bot_allowlist: vec![],
            channel_allowlist: vec![],
            require_mention: false,
            announce_on_start: false,
            memory_similarity_floor: 0.2,
            create_thread_on_reply: false,
        }
    }
}

/// An extra bind mount for a container agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountSpec {
    pub host_path: PathBuf,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Container-only resources: image, workspace, mounts, labels, restart policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceConfig {
    pub image: String,
    pub workspace_host_path: PathBuf,
    pub workspace_mount_path: String,
    pub extra_mounts: Vec<MountSpec>,
    pub env_overrides: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub restart_policy: String,
    /// Optional health probe exec'd inside the container; exit 0 = healthy.
    pub probe_command: Vec<String>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            image: String::new(),
            workspace_host_path: PathBuf::new(),
            workspace_mount_path: "/workspace".into(),
            extra_mounts: vec![],
            env_overrides: HashMap::new(),
            labels: HashMap::new(),
            restart_policy: "unless-stopped".into(),
            probe_command: vec![],
        }
    }
}

/// Immutable declaration of one agent, loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    /// Stable identifier, unique in the fleet. Filled from the config map key.
    #[serde(default)]
    pub id: String,
    pub kind: AgentKind,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub system_prompt_suffix: String,
    pub llm: LlmConfig,
    /// Name of the environment variable holding this agent's Discord token.
    pub discord_token_ref: String,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    /// Required for container agents, forbidden for process agents.
    #[serde(default)]
    pub resources: Option<ResourceConfig>,
    /// Reconcile deploys this spec automatically when no instance is live.
    #[serde(default = "default_true")]
    pub auto_deploy: bool,
}

fn default_true() -> bool {
    true
}

impl AgentSpec {
    /// Display name, falling back to the spec id.
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}
