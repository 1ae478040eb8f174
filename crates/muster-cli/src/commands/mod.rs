use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use muster_config::{load_config, FleetConfig, SecretResolver};
use muster_container::ContainerRuntime;
use muster_core::{AgentKind, MusterError, Provider, Result};
use muster_llm::OpenAiEmbedding;
use muster_memory::MemoryService;
use muster_supervisor::Supervisor;

mod start;

/// muster — multi-agent supervisor and Discord gateway
#[derive(Parser)]
#[command(name = "muster", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to muster.toml (default: ./muster.toml, then ~/.muster/muster.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the gateway, reconcile the fleet, and serve until interrupted
    Start,
    /// Deploy one declared agent
    Deploy { spec_id: String },
    /// Gracefully stop an instance
    Stop {
        spec_id: String,
        /// Seconds to wait before forcing termination
        #[arg(long, default_value = "10")]
        grace: u64,
    },
    /// Stop then deploy, preserving the spec
    Restart {
        spec_id: String,
        #[arg(long, default_value = "10")]
        grace: u64,
    },
    /// Show instance status
    Status {
        spec_id: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Tail an instance's logs
    Logs {
        spec_id: String,
        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        tail: usize,
    },
    /// List declared specs, or live instances with --instances
    List {
        #[arg(long)]
        instances: bool,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or("info")
        };
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
            )
            .with_target(false)
            .init();

        let config_path = resolve_config_path(self.config.as_deref());
        let config = load_config(&config_path)?;
        let secrets = SecretResolver::from_env(&config)?;

        match self.command {
            Commands::Start => {
                let supervisor = build_supervisor(config, secrets)?;
                start::cmd_start(supervisor).await
            }
            Commands::Deploy { spec_id } => {
                let supervisor = build_supervisor(config, secrets)?;
                supervisor.observe().await;
                cmd_deploy(supervisor, &spec_id).await
            }
            Commands::Stop { spec_id, grace } => {
                let supervisor = build_supervisor(config, secrets)?;
                // A fresh CLI invocation re-observes running containers
                // before acting; there is no on-disk supervisor state.
                supervisor.observe().await;
                let state = supervisor.stop(&spec_id, grace).await?;
                println!("{spec_id}: {state}");
                Ok(())
            }
            Commands::Restart { spec_id, grace } => {
                let supervisor = build_supervisor(config, secrets)?;
                supervisor.observe().await;
                supervisor.restart(&spec_id, grace).await?;
                println!("{spec_id}: restarted");
                Ok(())
            }
            Commands::Status { spec_id, json } => {
                let supervisor = build_supervisor(config, secrets)?;
                supervisor.observe().await;
                cmd_status(supervisor, spec_id.as_deref(), json)
            }
            Commands::Logs { spec_id, tail } => {
                let supervisor = build_supervisor(config, secrets)?;
                supervisor.observe().await;
                let logs = supervisor.logs(&spec_id, tail).await?;
                println!("{logs}");
                Ok(())
            }
            Commands::List { instances } => {
                let supervisor = build_supervisor(config, secrets)?;
                cmd_list(supervisor, instances)
            }
        }
    }
}

/// Resolve the config path: explicit path > MUSTER_CONFIG env >
/// ./muster.toml > ~/.muster/muster.toml
fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(p) = std::env::var("MUSTER_CONFIG") {
        return PathBuf::from(p);
    }
    let local = PathBuf::from("muster.toml");
    if local.exists() {
        return local;
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".muster")
        .join("muster.toml")
}

/// Wire the supervisor: shared memory service when the embedding key is
/// available, container runtime per the pull policy.
fn build_supervisor(config: FleetConfig, secrets: SecretResolver) -> Result<Supervisor> {
    let memory = match secrets.api_key_for(Provider::OpenAi) {
        Ok(key) => {
            let embedder = Arc::new(
                OpenAiEmbedding::new(key.to_string())
                    .with_timeout(std::time::Duration::from_secs(
                        config.global.embedding_timeout_secs,
                    )),
            );
            Some(Arc::new(MemoryService::open(
                &config.global.memory_db_path,
                config.global.embedding_dims,
                embedder,
            )?))
        }
        Err(_) => {
            tracing::warn!(
                "no {} in secrets_refs — agents run without vector memory",
                SecretResolver::api_key_name(Provider::OpenAi)
            );
            None
        }
    };
    let runtime = ContainerRuntime::new(config.global.pull_missing_images);
    Supervisor::new(config, secrets, memory, runtime)
}

async fn cmd_deploy(supervisor: Supervisor, spec_id: &str) -> Result<()> {
    let spec = supervisor
        .list_specs()
        .into_iter()
        .find(|s| s.id == spec_id)
        .ok_or_else(|| MusterError::Config(format!("unknown spec '{spec_id}'")))?;
    if spec.kind == AgentKind::Process {
        return Err(MusterError::Agent(format!(
            "'{spec_id}' is a process agent; process agents run under `muster start`"
        )));
    }
    supervisor.deploy(spec_id).await?;
    println!("{spec_id}: deployed");
    Ok(())
}

fn cmd_status(supervisor: Supervisor, spec_id: Option<&str>, json: bool) -> Result<()> {
    let statuses = supervisor.status(spec_id)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&statuses).unwrap_or_default()
        );
        return Ok(());
    }
    if statuses.is_empty() {
        println!("no instances");
        return Ok(());
    }
    for s in statuses {
        let uptime = s
            .uptime_secs
            .map(|u| format!("{u}s"))
            .unwrap_or_else(|| "-".into());
        let health = match s.healthy {
            Some(true) => "healthy",
            Some(false) => "unhealthy",
            None => "-",
        };
        println!(
            "{:<20} {:<10} up {:<8} restarts {:<3} {:<10} {}",
            s.spec_id,
            s.state.to_string(),
            uptime,
            s.restart_count,
            health,
            s.last_error.unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_list(supervisor: Supervisor, instances: bool) -> Result<()> {
    if instances {
        for s in supervisor.list_instances() {
            println!("{:<20} {}", s.spec_id, s.state);
        }
    } else {
        for spec in supervisor.list_specs() {
            println!(
                "{:<20} {:<10} {:<10} {}",
                spec.id,
                match spec.kind {
                    AgentKind::Process => "process",
                    AgentKind::Container => "container",
                },
                spec.llm.provider.to_string(),
                spec.llm.model
            );
        }
    }
    Ok(())
}
