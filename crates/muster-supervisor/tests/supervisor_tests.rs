//! Supervisor lifecycle tests: process agents run as real engine tasks
//! against an unconnected in-process gateway, so no network or container
//! engine is required.

use std::collections::HashMap;
use std::time::Duration;

use muster_config::{FleetConfig, SecretResolver};
use muster_container::ContainerRuntime;
use muster_core::{InstanceState, MusterError};
use muster_supervisor::Supervisor;

fn config(toml_src: &str) -> FleetConfig {
    let mut config: FleetConfig = toml::from_str(toml_src).unwrap();
    for (id, spec) in config.agents.iter_mut() {
        spec.id = id.clone();
    }
    config.validate().unwrap();
    config
}

fn secrets(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn process_fleet(log_root: &std::path::Path) -> (FleetConfig, SecretResolver) {
    let toml_src = format!(
        r#"
secrets_refs = ["DISCORD_TOKEN_A", "XAI_API_KEY"]

[global]
log_root = "{}"
startup_timeout_secs = 10

[agents.a1]
kind = "process"
display_name = "A1"
discord_token_ref = "DISCORD_TOKEN_A"

[agents.a1.llm]
provider = "grok"
model = "grok-2-1212"
"#,
        log_root.display()
    );
    let config = config(&toml_src);
    let resolver = SecretResolver::from_values(
        secrets(&[("DISCORD_TOKEN_A", "tok-a"), ("XAI_API_KEY", "xai")]),
        &config,
    )
    .unwrap();
    (config, resolver)
}

fn supervisor(config: FleetConfig, resolver: SecretResolver) -> Supervisor {
    Supervisor::new(config, resolver, None, ContainerRuntime::new(false)).unwrap()
}

async fn wait_for_state(s: &Supervisor, spec_id: &str, want: InstanceState) -> bool {
    for _ in 0..100 {
        if let Ok(status) = s.status(Some(spec_id)) {
            if status[0].state == want {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ── Deploy / stop lifecycle ────────────────────────────────────

#[tokio::test]
async fn deploy_reaches_running_then_stop_is_terminal_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (config, resolver) = process_fleet(dir.path());
    let s = supervisor(config, resolver);

    s.deploy("a1").await.unwrap();
    let status = s.status(Some("a1")).unwrap();
    assert!(matches!(
        status[0].state,
        InstanceState::Starting | InstanceState::Running
    ));

    assert!(wait_for_state(&s, "a1", InstanceState::Running).await);
    let status = s.status(Some("a1")).unwrap();
    assert_eq!(status[0].healthy, Some(true));
    assert!(status[0].uptime_secs.is_some());

    assert_eq!(s.stop("a1", 2).await.unwrap(), InstanceState::Stopped);
    assert_eq!(
        s.status(Some("a1")).unwrap()[0].state,
        InstanceState::Stopped
    );

    // Repeating stop is a no-op that still reports stopped.
    assert_eq!(s.stop("a1", 2).await.unwrap(), InstanceState::Stopped);
    // Stopping something never deployed is also a clean no-op.
    assert_eq!(s.stop("ghost", 2).await.unwrap(), InstanceState::Stopped);
}

#[tokio::test]
async fn deploy_requires_declared_spec_and_no_live_instance() {
    let dir = tempfile::tempdir().unwrap();
    let (config, resolver) = process_fleet(dir.path());
    let s = supervisor(config, resolver);

    let err = s.deploy("nope").await.unwrap_err();
    assert!(matches!(err, MusterError::Config(_)));

    s.deploy("a1").await.unwrap();
    let err = s.deploy("a1").await.unwrap_err();
    assert!(err.to_string().contains("already"), "got: {err}");

    s.stop("a1", 2).await.unwrap();
    // After a terminal state the spec can be deployed again.
    s.deploy("a1").await.unwrap();
    s.stop("a1", 2).await.unwrap();
}

#[tokio::test]
async fn restart_cycles_the_instance() {
    let dir = tempfile::tempdir().unwrap();
    let (config, resolver) = process_fleet(dir.path());
    let s = supervisor(config, resolver);

    s.deploy("a1").await.unwrap();
    assert!(wait_for_state(&s, "a1", InstanceState::Running).await);
    s.restart("a1", 2).await.unwrap();
    assert!(wait_for_state(&s, "a1", InstanceState::Running).await);
    s.stop("a1", 2).await.unwrap();
}

// ── S3: duplicate token rejection ──────────────────────────────

#[tokio::test]
async fn duplicate_tokens_reject_startup_before_any_connection() {
    let toml_src = r#"
secrets_refs = ["TOKEN_X", "TOKEN_Y", "XAI_API_KEY"]

[agents.a1]
kind = "process"
discord_token_ref = "TOKEN_X"

[agents.a1.llm]
provider = "grok"
model = "grok-2-1212"

[agents.a2]
kind = "process"
discord_token_ref = "TOKEN_Y"

[agents.a2.llm]
provider = "grok"
model = "grok-2-1212"
"#;
    let config = config(toml_src);
    // Both refs resolve to the same token value.
    let err = SecretResolver::from_values(
        secrets(&[
            ("TOKEN_X", "same"),
            ("TOKEN_Y", "same"),
            ("XAI_API_KEY", "xai"),
        ]),
        &config,
    )
    .unwrap_err();
    assert!(matches!(err, MusterError::DuplicateBotToken { .. }));
}

// ── Container deploys fail cleanly without an engine ───────────

#[tokio::test]
async fn container_deploy_failure_parks_instance_in_failed() {
    let dir = tempfile::tempdir().unwrap();
    let toml_src = format!(
        r#"
secrets_refs = ["DISCORD_TOKEN_C", "ANTHROPIC_API_KEY"]

[global]
log_root = "{}"

[agents.c1]
kind = "container"
discord_token_ref = "DISCORD_TOKEN_C"
auto_deploy = false

[agents.c1.llm]
provider = "anthropic"
model = "claude-sonnet-4"

[agents.c1.resources]
image = "muster/does-not-exist:latest"
workspace_host_path = "/tmp"
"#,
        dir.path().display()
    );
    let config = config(&toml_src);
    let resolver = SecretResolver::from_values(
        secrets(&[("DISCORD_TOKEN_C", "tok-c"), ("ANTHROPIC_API_KEY", "ant")]),
        &config,
    )
    .unwrap();
    let s = supervisor(config, resolver);

    assert!(s.deploy("c1").await.is_err());
    let status = s.status(Some("c1")).unwrap();
    assert_eq!(status[0].state, InstanceState::Failed);
    assert!(status[0].last_error.is_some());
}

// ── Crash loop: restart budget exhaustion ──────────────────────

#[tokio::test]
async fn failing_health_probes_drive_crash_loop_until_budget_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    // A zero idle threshold means a probe only passes once the loop has
    // consumed traffic; an agent that never sees an event reads as dead.
    // With a 1 s startup window the promotion task crashes the instance,
    // and a budget of 1 allows exactly one automatic restart.
    let toml_src = format!(
        r#"
secrets_refs = ["DISCORD_TOKEN_A", "XAI_API_KEY"]

[global]
log_root = "{}"
startup_timeout_secs = 1
restart_budget = 1
restart_window_secs = 60
idle_eviction_secs = 0

[agents.a1]
kind = "process"
discord_token_ref = "DISCORD_TOKEN_A"

[agents.a1.llm]
provider = "grok"
model = "grok-2-1212"
"#,
        dir.path().display()
    );
    let config = config(&toml_src);
    let resolver = SecretResolver::from_values(
        secrets(&[("DISCORD_TOKEN_A", "tok-a"), ("XAI_API_KEY", "xai")]),
        &config,
    )
    .unwrap();
    let s = supervisor(config, resolver);

    s.deploy("a1").await.unwrap();

    // Watch the instance cycle: starting → crash_loop → starting →
    // crash_loop → failed, collecting every state seen on the way.
    let mut observed = std::collections::HashSet::new();
    let mut failed = false;
    for _ in 0..300 {
        if let Ok(status) = s.status(Some("a1")) {
            observed.insert(status[0].state);
            if status[0].state == InstanceState::Failed {
                failed = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(failed, "instance never reached failed, saw: {observed:?}");
    assert!(
        observed.contains(&InstanceState::CrashLoop),
        "crash_loop was never observed, saw: {observed:?}"
    );

    let status = s.status(Some("a1")).unwrap();
    assert_eq!(status[0].restart_count, 1);
    assert!(
        status[0]
            .last_error
            .as_deref()
            .unwrap_or_default()
            .contains("health probe"),
        "got: {:?}",
        status[0].last_error
    );

    // Failed is terminal: no further automatic restart attempts.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let status = s.status(Some("a1")).unwrap();
    assert_eq!(status[0].state, InstanceState::Failed);
    assert_eq!(status[0].restart_count, 1);

    // Leaving failed takes operator intervention, which is allowed.
    s.deploy("a1").await.unwrap();
    s.stop("a1", 2).await.unwrap();
}

// ── Logs ───────────────────────────────────────────────────────

#[tokio::test]
async fn process_logs_tail_the_agent_log() {
    let dir = tempfile::tempdir().unwrap();
    let (config, resolver) = process_fleet(dir.path());
    let s = supervisor(config, resolver);

    s.deploy("a1").await.unwrap();
    assert!(wait_for_state(&s, "a1", InstanceState::Running).await);
    let logs = s.logs("a1", 10).await.unwrap();
    assert!(logs.contains("engine started"), "got: {logs}");

    s.stop("a1", 2).await.unwrap();
    // Logs remain readable after the instance stops.
    let logs = s.logs("a1", 10).await.unwrap();
    assert!(logs.contains("engine stopped"), "got: {logs}");
}

// ── Reconcile ──────────────────────────────────────────────────

#[tokio::test]
async fn reconcile_deploys_auto_deploy_specs() {
    let dir = tempfile::tempdir().unwrap();
    let (config, resolver) = process_fleet(dir.path());
    let s = supervisor(config, resolver);

    let report = s.reconcile().await;
    assert_eq!(report.deployed, vec!["a1".to_string()]);
    assert!(wait_for_state(&s, "a1", InstanceState::Running).await);

    // A second pass converges to nothing new.
    let report = s.reconcile().await;
    assert!(report.deployed.is_empty());
    s.stop("a1", 2).await.unwrap();

    // After a stop, reconcile brings the spec back.
    let report = s.reconcile().await;
    assert_eq!(report.deployed, vec!["a1".to_string()]);
    s.shutdown(2).await;
}

// ── Status listing ─────────────────────────────────────────────

#[tokio::test]
async fn status_lists_specs_and_instances() {
    let dir = tempfile::tempdir().unwrap();
    let (config, resolver) = process_fleet(dir.path());
    let s = supervisor(config, resolver);

    assert_eq!(s.list_specs().len(), 1);
    assert!(s.list_instances().is_empty());
    assert!(s.status(Some("a1")).is_err());

    s.deploy("a1").await.unwrap();
    assert_eq!(s.list_instances().len(), 1);
    assert_eq!(s.status(None).unwrap().len(), 1);
    assert_eq!(s.status(Some("a1")).unwrap()[0].restart_count, 0);
    s.stop("a1", 2).await.unwrap();
}
