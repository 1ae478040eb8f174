use std::collections::HashMap;
use std::io::Write;

use muster_config::{load_config, FleetConfig, SecretResolver};
use muster_core::{MusterError, Provider};

const VALID: &str = r#"
secrets_refs = ["DISCORD_TOKEN_GROK", "DISCORD_TOKEN_CLAUDE", "XAI_API_KEY"]

[global]
gateway_listen = "127.0.0.1:9091"
embedding_dims = 1536

[agents.grok4]
kind = "process"
display_name = "Grok4Agent"
personality = "Expert AI researcher"
discord_token_ref = "DISCORD_TOKEN_GROK"

[agents.grok4.llm]
provider = "grok"
model = "grok-2-1212"

[agents.builder]
kind = "container"
discord_token_ref = "DISCORD_TOKEN_CLAUDE"

[agents.builder.llm]
provider = "anthropic"
model = "claude-sonnet-4"

[agents.builder.resources]
image = "muster/devenv:latest"
workspace_host_path = "/srv/builder"
"#;

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f
}

fn secrets(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn loads_valid_config_and_assigns_ids() {
    let f = write_temp(VALID);
    let config = load_config(f.path()).unwrap();
    assert_eq!(config.agents.len(), 2);
    assert_eq!(config.agents["grok4"].id, "grok4");
    assert_eq!(config.agents["builder"].id, "builder");
    assert_eq!(config.global.embedding_dims, 1536);
    assert_eq!(config.global.probe_interval_secs, 60);
}

#[test]
fn loading_twice_is_deterministic() {
    let f = write_temp(VALID);
    let a = load_config(f.path()).unwrap();
    let b = load_config(f.path()).unwrap();
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn unknown_top_level_key_is_rejected() {
    let f = write_temp("[agents]\n\n[globall]\nlog_root = \"x\"\n");
    let err = load_config(f.path()).unwrap_err();
    assert!(matches!(err, MusterError::Config(_)), "got: {err}");
}

#[test]
fn process_agent_with_resources_is_rejected() {
    let bad = r#"
secrets_refs = ["T1"]

[agents.p1]
kind = "process"
discord_token_ref = "T1"

[agents.p1.llm]
provider = "openai"
model = "gpt-4o"

[agents.p1.resources]
image = "whatever"
workspace_host_path = "/tmp"
"#;
    let f = write_temp(bad);
    let err = load_config(f.path()).unwrap_err();
    assert!(err.to_string().contains("must not carry"), "got: {err}");
}

#[test]
fn container_agent_without_resources_is_rejected() {
    let bad = r#"
secrets_refs = ["T1"]

[agents.c1]
kind = "container"
discord_token_ref = "T1"

[agents.c1.llm]
provider = "anthropic"
model = "claude-sonnet-4"
"#;
    let f = write_temp(bad);
    assert!(load_config(f.path()).is_err());
}

#[test]
fn token_ref_must_be_declared_in_secrets_refs() {
    let bad = r#"
secrets_refs = []

[agents.p1]
kind = "process"
discord_token_ref = "DISCORD_TOKEN_X"

[agents.p1.llm]
provider = "openai"
model = "gpt-4o"
"#;
    let f = write_temp(bad);
    let err = load_config(f.path()).unwrap_err();
    assert!(err.to_string().contains("secrets_refs"), "got: {err}");
}

#[test]
fn resolver_rejects_missing_secret() {
    let f = write_temp(VALID);
    let config = load_config(f.path()).unwrap();
    let err = SecretResolver::from_values(
        secrets(&[("DISCORD_TOKEN_GROK", "tok-a")]),
        &config,
    )
    .unwrap_err();
    assert!(matches!(err, MusterError::MissingSecret(_)), "got: {err}");
}

#[test]
fn resolver_rejects_duplicate_tokens() {
    let f = write_temp(VALID);
    let config = load_config(f.path()).unwrap();
    let err = SecretResolver::from_values(
        secrets(&[
            ("DISCORD_TOKEN_GROK", "same-token"),
            ("DISCORD_TOKEN_CLAUDE", "same-token"),
            ("XAI_API_KEY", "xai-key"),
        ]),
        &config,
    )
    .unwrap_err();
    match err {
        MusterError::DuplicateBotToken { first, second } => {
            let mut pair = [first, second];
            pair.sort();
            assert_eq!(pair, ["builder".to_string(), "grok4".to_string()]);
        }
        other => panic!("expected DuplicateBotToken, got: {other}"),
    }
}

#[test]
fn resolver_serves_provider_keys() {
    let f = write_temp(VALID);
    let config = load_config(f.path()).unwrap();
    let resolver = SecretResolver::from_values(
        secrets(&[
            ("DISCORD_TOKEN_GROK", "tok-a"),
            ("DISCORD_TOKEN_CLAUDE", "tok-b"),
            ("XAI_API_KEY", "xai-key"),
        ]),
        &config,
    )
    .unwrap();
    assert_eq!(resolver.api_key_for(Provider::Grok).unwrap(), "xai-key");
    assert!(resolver.api_key_for(Provider::Google).is_err());
    assert_eq!(SecretResolver::redact("tok-abcd1234"), "…1234");
}

#[test]
fn default_config_validates() {
    let config = FleetConfig::default();
    assert!(config.validate().is_ok());
}
