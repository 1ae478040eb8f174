use serde::{Deserialize, Serialize};

/// Lifecycle of one agent instance, owned by the supervisor.
///
/// ```text
///   deploy            ready                 stop
/// ◻ ──────▶ starting ─────────▶ running ────────▶ stopping ──▶ stopped
///               │                  │
///               │failure           │failure
///               ▼                  ▼
///            failed ◀──── crash_loop ──── (restart budget exhausted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Starting,
    Running,
    Stopping,
    Stopped,
    CrashLoop,
    Failed,
}

impl InstanceState {
    /// Terminal states require a fresh `deploy` (and, for `Failed`,
    /// operator intervention).
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::Failed)
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self,
            InstanceState::Starting | InstanceState::Running | InstanceState::CrashLoop
        )
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceState::Starting => "starting",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::CrashLoop => "crash_loop",
            InstanceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Connection lifecycle of one bot identity inside the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Initializing,
    Connecting,
    Ready,
    Degraded,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}
