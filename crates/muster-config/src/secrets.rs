use std::collections::HashMap;
use tracing::info;

use muster_core::{MusterError, Provider, Result};

use crate::schema::FleetConfig;

/// Boot-time secret material, resolved once from the environment and passed
/// by value to the components that need it. Values are never logged; only
/// the last four characters appear in diagnostics.
#[derive(Clone)]
pub struct SecretResolver {
    values: HashMap<String, String>,
}

impl SecretResolver {
    /// Resolve every name in `secrets_refs` from the environment. Missing
    /// any referenced secret is a fatal startup error, as is two distinct
    /// agents resolving to the same Discord token.
    pub fn from_env(config: &FleetConfig) -> Result<Self> {
        let mut values = HashMap::new();
        for name in &config.secrets_refs {
            match std::env::var(name) {
                Ok(v) if !v.is_empty() => {
                    values.insert(name.clone(), v);
                }
                _ => return Err(MusterError::MissingSecret(name.clone())),
            }
        }

        let resolver = Self { values };
        resolver.reject_duplicate_tokens(config)?;
        info!(resolved = resolver.values.len(), "secrets resolved");
        Ok(resolver)
    }

    /// Build a resolver from explicit values. Test seam; also used by the
    /// CLI when secrets come from a file-backed store.
    pub fn from_values(values: HashMap<String, String>, config: &FleetConfig) -> Result<Self> {
        for name in &config.secrets_refs {
            if !values.contains_key(name) {
                return Err(MusterError::MissingSecret(name.clone()));
            }
        }
        let resolver = Self { values };
        resolver.reject_duplicate_tokens(config)?;
        Ok(resolver)
    }

    /// All bots sharing one token would appear as the same Discord identity;
    /// the configuration is rejected before any connection is opened.
    fn reject_duplicate_tokens(&self, config: &FleetConfig) -> Result<()> {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (id, spec) in &config.agents {
            let token = self.get(&spec.discord_token_ref)?;
            if let Some(prior) = seen.insert(token, id) {
                return Err(MusterError::DuplicateBotToken {
                    first: prior.to_string(),
                    second: id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Look up a secret by its reference name.
    pub fn get(&self, name: &str) -> Result<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| MusterError::MissingSecret(name.to_string()))
    }

    /// The canonical API-key environment name for a provider.
    pub fn api_key_name(provider: Provider) -> &'static str {
        match provider {
            Provider::Grok => "XAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Google => "GOOGLE_AI_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// API key for a provider, by canonical name.
    pub fn api_key_for(&self, provider: Provider) -> Result<&str> {
        self.get(Self::api_key_name(provider))
    }

    /// Redacted form for diagnostics: `…abcd`.
    pub fn redact(value: &str) -> String {
        let tail: String = value
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("…{tail}")
    }
}

impl std::fmt::Debug for SecretResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretResolver")
            .field("resolved", &self.values.len())
            .finish()
    }
}
