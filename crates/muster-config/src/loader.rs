use std::path::Path;
use tracing::info;

use muster_core::{MusterError, Result};

use crate::schema::FleetConfig;

/// Load, parse, and validate the fleet configuration.
///
/// The returned object is immutable for the life of the process; components
/// receive their slice by parameter. Unknown keys anywhere in the document
/// are a parse error.
pub fn load_config(path: &Path) -> Result<FleetConfig> {
    info!(?path, "loading fleet configuration");
    let raw = std::fs::read_to_string(path).map_err(|e| {
        MusterError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;

    let mut config: FleetConfig = toml::from_str(&raw).map_err(|e| {
        MusterError::Config(format!("failed to parse {}: {}", path.display(), e))
    })?;

    // The map key is the authoritative spec id.
    for (id, spec) in config.agents.iter_mut() {
        spec.id = id.clone();
    }

    config
        .validate()
        .map_err(|e| MusterError::Config(format!("invalid configuration:\n  - {e}")))?;

    info!(
        agents = config.agents.len(),
        secrets = config.secrets_refs.len(),
        "configuration loaded"
    );
    Ok(config)
}
