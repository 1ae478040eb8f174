use thiserror::Error;

/// Unified error type for the entire muster fleet.
///
/// Each component converts lower-layer errors into this taxonomy at its
/// boundary. Only configuration errors abort the process; everything else is
/// scoped to a turn, an instance, or a single call.
#[derive(Error, Debug)]
pub enum MusterError {
    // ── Configuration (fatal at startup) ───────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("duplicate bot token: '{first}' and '{second}' resolve to the same Discord token")]
    DuplicateBotToken { first: String, second: String },

    #[error("missing secret '{0}' in environment")]
    MissingSecret(String),

    // ── Gateway ────────────────────────────────────────────────
    #[error("unknown bot '{0}'")]
    UnknownBot(String),

    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    // ── Language model / embeddings ────────────────────────────
    #[error("provider error: {0}")]
    Provider(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    // ── Memory store ───────────────────────────────────────────
    #[error("memory store unavailable: {0}")]
    StoreUnavailable(String),

    // ── Supervisor / container runtime ─────────────────────────
    #[error("handle lost: {0}")]
    HandleLost(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("overloaded: {0}")]
    Overloaded(String),

    #[error("agent error: {0}")]
    Agent(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MusterError>;

impl MusterError {
    /// Stable machine-readable kind, used in HTTP error bodies and status
    /// reports.
    pub fn kind(&self) -> &'static str {
        match self {
            MusterError::Config(_) => "config",
            MusterError::DuplicateBotToken { .. } => "duplicate_bot_token",
            MusterError::MissingSecret(_) => "missing_secret",
            MusterError::UnknownBot(_) => "unknown_bot",
            MusterError::UnknownChannel(_) => "unknown_channel",
            MusterError::Forbidden(_) => "forbidden",
            MusterError::RateLimited { .. } => "rate_limited",
            MusterError::Transport(_) => "transport",
            MusterError::FileTooLarge { .. } => "file_too_large",
            MusterError::Provider(_) => "provider",
            MusterError::EmbeddingUnavailable(_) => "embedding_unavailable",
            MusterError::StoreUnavailable(_) => "store_unavailable",
            MusterError::HandleLost(_) => "handle_lost",
            MusterError::PermissionDenied(_) => "permission_denied",
            MusterError::Overloaded(_) => "overloaded",
            MusterError::Agent(_) => "agent",
            MusterError::Io(_) => "io",
            MusterError::Serialization(_) => "serialization",
            MusterError::Other(_) => "other",
        }
    }

    /// Whether a caller may retry the same call after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MusterError::Transport(_)
                | MusterError::RateLimited { .. }
                | MusterError::Overloaded(_)
                | MusterError::StoreUnavailable(_)
                | MusterError::EmbeddingUnavailable(_)
        )
    }

    /// The `retry_after` hint, when one exists.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            MusterError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
