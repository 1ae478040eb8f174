//! # muster-container
//!
//! A small, purely mechanical surface over the container engine: launch,
//! stop, inspect, logs, exec, and list, driven through the docker CLI. The
//! adapter never interprets agent semantics and never reads secret material
//! from disk — env and mounts arrive fully resolved from the supervisor.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use muster_core::{MusterError, Result};

/// Labels every managed container carries.
pub const LABEL_MANAGED: &str = "muster.managed";
pub const LABEL_AGENT: &str = "muster.agent";

/// One bind mount.
#[derive(Debug, Clone)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

/// Everything needed to create one agent container. Env values are already
/// resolved secrets; this type never logs them.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub agent_id: String,
    pub image: String,
    /// Sorted for deterministic argv construction.
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub labels: BTreeMap<String, String>,
    pub restart_policy: String,
    pub network: String,
    pub workdir: Option<String>,
}

/// Opaque handle to a launched container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// Snapshot from `docker inspect`.
#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub state: String,
    pub running: bool,
    pub started_at: Option<String>,
    pub exit_code: Option<i64>,
}

/// Result of an in-container exec, used for health probes.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// The docker CLI adapter.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    /// Pull images that are missing locally instead of erroring.
    pull_missing: bool,
}

impl ContainerRuntime {
    pub fn new(pull_missing: bool) -> Self {
        Self { pull_missing }
    }

    /// Engine reachability: `docker version` round-trip.
    pub async fn health(&self) -> Result<()> {
        run_docker(&["version", "--format", "{{.Server.Version}}"])
            .await
            .map(|_| ())
    }

    /// Create the named bridge network when it does not exist yet.
    pub async fn ensure_network(&self, name: &str) -> Result<()> {
        if run_docker(&["network", "inspect", name]).await.is_ok() {
            return Ok(());
        }
        info!(network = name, "creating container network");
        run_docker(&["network", "create", "--driver", "bridge", name])
            .await
            .map(|_| ())
    }

    /// Verify the image is present; missing images are a hard error unless
    /// the pull policy allows fetching them.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if run_docker(&["image", "inspect", image]).await.is_ok() {
            return Ok(());
        }
        if !self.pull_missing {
            return Err(MusterError::Config(format!(
                "image '{image}' is not present locally and pull_missing_images is off"
            )));
        }
        info!(image, "pulling image");
        run_docker(&["pull", image]).await.map(|_| ())
    }

    /// Create and start a detached container for one agent.
    pub async fn launch(&self, spec: &LaunchSpec) -> Result<ContainerHandle> {
        self.ensure_image(&spec.image).await?;
        self.ensure_network(&spec.network).await?;

        let name = container_name(&spec.agent_id);
        let args = run_args(spec, &name);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        info!(
            agent = %spec.agent_id,
            container = %name,
            image = %spec.image,
            "launching container"
        );
        let id = run_docker(&arg_refs).await?;
        Ok(ContainerHandle { id, name })
    }

    /// Stop with a grace period; optionally remove the container after.
    pub async fn stop(&self, handle: &ContainerHandle, grace_secs: u64, remove: bool) -> Result<()> {
        let grace = grace_secs.to_string();
        info!(container = %handle.name, grace_secs, "stopping container");
        let stopped = run_docker(&["stop", "-t", &grace, &handle.name]).await;
        if let Err(e) = stopped {
            // Already gone is success for a stop.
            if !matches!(e, MusterError::HandleLost(_)) {
                return Err(e);
            }
        }
        if remove {
            let _ = run_docker(&["rm", "-f", &handle.name]).await;
        }
        Ok(())
    }

    pub async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus> {
        let raw = run_docker(&["inspect", &handle.name]).await?;
        parse_inspect(&raw)
    }

    pub async fn logs(&self, handle: &ContainerHandle, tail_lines: usize) -> Result<String> {
        let tail = tail_lines.to_string();
        run_docker(&["logs", "--tail", &tail, &handle.name]).await
    }

    /// Run a command inside the container; used for health probes.
    pub async fn exec(&self, handle: &ContainerHandle, argv: &[String]) -> Result<ExecResult> {
        let mut args: Vec<&str> = vec!["exec", &handle.name];
        args.extend(argv.iter().map(String::as_str));

        let output = tokio::process::Command::new("docker")
            .args(&args)
            .output()
            .await
            .map_err(|e| MusterError::Transport(format!("failed to exec docker: {e}")))?;

        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Handles of every container carrying a label, e.g.
    /// `muster.managed=true`. Used by reconcile to re-observe the fleet.
    pub async fn list(&self, label_selector: &str) -> Result<Vec<ContainerHandle>> {
        let filter = format!("label={label_selector}");
        let raw = run_docker(&[
            "ps",
            "-a",
            "--filter",
            &filter,
            "--format",
            "{{.ID}} {{.Names}}",
        ])
        .await?;
        Ok(raw
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                Some(ContainerHandle {
                    id: parts.next()?.to_string(),
                    name: parts.next()?.to_string(),
                })
            })
            .collect())
    }

    /// The agent label value recorded on a container, from inspect.
    pub async fn agent_label(&self, handle: &ContainerHandle) -> Result<Option<String>> {
        let raw = run_docker(&["inspect", &handle.name]).await?;
        let parsed: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| MusterError::Transport(e.to_string()))?;
        Ok(parsed[0]["Config"]["Labels"][LABEL_AGENT]
            .as_str()
            .map(|s| s.to_string()))
    }
}

/// Deterministic container name for an agent.
pub fn container_name(agent_id: &str) -> String {
    format!("agent-{agent_id}")
}

/// Build the full `docker run` argv. Pure, so it is testable without a
/// daemon.
pub fn run_args(spec: &LaunchSpec, name: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "-d".into(),
        "--name".into(),
        name.into(),
        "--network".into(),
        spec.network.clone(),
        "--restart".into(),
        spec.restart_policy.clone(),
        "--label".into(),
        format!("{LABEL_MANAGED}=true"),
        "--label".into(),
        format!("{LABEL_AGENT}={}", spec.agent_id),
    ];
    for (k, v) in &spec.labels {
        args.push("--label".into());
        args.push(format!("{k}={v}"));
    }
    for (k, v) in &spec.env {
        args.push("-e".into());
        args.push(format!("{k}={v}"));
    }
    for mount in &spec.mounts {
        let mode = if mount.read_only { ":ro" } else { "" };
        args.push("-v".into());
        args.push(format!(
            "{}:{}{mode}",
            mount.host_path.display(),
            mount.container_path
        ));
    }
    if let Some(ref workdir) = spec.workdir {
        args.push("-w".into());
        args.push(workdir.clone());
    }
    args.push(spec.image.clone());
    args
}

/// Parse the array `docker inspect` prints.
fn parse_inspect(raw: &str) -> Result<ContainerStatus> {
    let parsed: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| MusterError::Transport(e.to_string()))?;
    let state = &parsed[0]["State"];
    if state.is_null() {
        return Err(MusterError::HandleLost("no such container".into()));
    }
    Ok(ContainerStatus {
        state: state["Status"].as_str().unwrap_or("unknown").to_string(),
        running: state["Running"].as_bool().unwrap_or(false),
        started_at: state["StartedAt"].as_str().map(|s| s.to_string()),
        exit_code: state["ExitCode"].as_i64(),
    })
}

/// Run a docker CLI command and return trimmed stdout on success.
async fn run_docker(args: &[&str]) -> Result<String> {
    debug!(cmd = %args.first().unwrap_or(&""), "docker invocation");
    let output = tokio::process::Command::new("docker")
        .args(args)
        .output()
        .await
        .map_err(|e| MusterError::Transport(format!("failed to exec docker: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        warn!(cmd = %args.first().unwrap_or(&""), error = %stderr, "docker command failed");
        Err(classify_docker_error(stderr))
    }
}

/// Map docker CLI stderr into the error taxonomy.
fn classify_docker_error(stderr: &str) -> MusterError {
    let lower = stderr.to_lowercase();
    if lower.contains("permission denied") {
        MusterError::PermissionDenied(stderr.to_string())
    } else if lower.contains("no such container") || lower.contains("is not running") {
        MusterError::HandleLost(stderr.to_string())
    } else if lower.contains("no such image")
        || lower.contains("not found: manifest unknown")
        || lower.contains("pull access denied")
    {
        MusterError::Config(stderr.to_string())
    } else {
        MusterError::Transport(stderr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch_spec() -> LaunchSpec {
        let mut env = BTreeMap::new();
        env.insert("DISCORD_TOKEN".into(), "tok".into());
        env.insert("AGENT_NAME".into(), "builder".into());
        let mut labels = BTreeMap::new();
        labels.insert("team".into(), "devops".into());
        LaunchSpec {
            agent_id: "builder".into(),
            image: "muster/devenv:latest".into(),
            env,
            mounts: vec![
                Mount {
                    host_path: PathBuf::from("/srv/builder"),
                    container_path: "/workspace".into(),
                    read_only: false,
                },
                Mount {
                    host_path: PathBuf::from("/home/op/.ssh"),
                    container_path: "/root/.ssh".into(),
                    read_only: true,
                },
            ],
            labels,
            restart_policy: "unless-stopped".into(),
            network: "muster-net".into(),
            workdir: Some("/workspace".into()),
        }
    }

    #[test]
    fn run_args_carry_labels_env_and_mounts() {
        let spec = launch_spec();
        let args = run_args(&spec, "agent-builder");

        assert_eq!(args[0], "run");
        assert!(args.contains(&"-d".to_string()));
        assert!(args.contains(&"agent-builder".to_string()));
        assert!(args.contains(&"muster.managed=true".to_string()));
        assert!(args.contains(&"muster.agent=builder".to_string()));
        assert!(args.contains(&"team=devops".to_string()));
        assert!(args.contains(&"AGENT_NAME=builder".to_string()));
        assert!(args.contains(&"DISCORD_TOKEN=tok".to_string()));
        assert!(args.contains(&"/srv/builder:/workspace".to_string()));
        assert!(args.contains(&"/home/op/.ssh:/root/.ssh:ro".to_string()));
        assert!(args.contains(&"unless-stopped".to_string()));
        // The image is the trailing argument.
        assert_eq!(args.last().unwrap(), "muster/devenv:latest");
    }

    #[test]
    fn run_args_are_deterministic() {
        let spec = launch_spec();
        assert_eq!(run_args(&spec, "n"), run_args(&spec, "n"));
    }

    #[test]
    fn container_names_are_stable() {
        assert_eq!(container_name("builder"), "agent-builder");
    }

    #[test]
    fn inspect_parsing() {
        let raw = r#"[{"State":{"Status":"running","Running":true,"StartedAt":"2026-08-02T10:00:00Z","ExitCode":0}}]"#;
        let status = parse_inspect(raw).unwrap();
        assert!(status.running);
        assert_eq!(status.state, "running");
        assert_eq!(status.exit_code, Some(0));

        assert!(parse_inspect("[]").is_err());
    }

    #[test]
    fn docker_errors_are_classified() {
        assert!(matches!(
            classify_docker_error("Got permission denied while trying to connect"),
            MusterError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_docker_error("Error: No such container: agent-x"),
            MusterError::HandleLost(_)
        ));
        assert!(matches!(
            classify_docker_error("Error response from daemon: pull access denied for img"),
            MusterError::Config(_)
        ));
        assert!(matches!(
            classify_docker_error("Cannot connect to the Docker daemon"),
            MusterError::Transport(_)
        ));
    }
}
