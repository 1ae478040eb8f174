//! # muster-supervisor
//!
//! Owns the fleet: reconciles declared agent specs against observed
//! instances, drives the per-instance state machine, probes health, and
//! enforces rolling-window restart budgets. Process-kind agents run as
//! supervised conversation-engine tasks; container-kind agents go through
//! the container runtime adapter.

pub mod restart;

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use muster_config::{FleetConfig, SecretResolver};
use muster_container::{ContainerHandle, ContainerRuntime, LaunchSpec, Mount, LABEL_MANAGED};
use muster_core::{AgentKind, AgentSpec, InstanceState, MusterError, Result};
use muster_engine::{AgentLog, ChatSurface, ConversationEngine, EngineConfig, EngineStats};
use muster_gateway::{Gateway, GatewayConfig};
use muster_llm::build_provider;
use muster_memory::MemoryService;

use restart::RestartWindow;

/// Runtime handle for one live instance.
enum InstanceHandle {
    Process {
        stats: Arc<EngineStats>,
        shutdown: watch::Sender<bool>,
        task: JoinHandle<Result<()>>,
        log: Arc<AgentLog>,
    },
    Container(ContainerHandle),
}

/// Supervisor-side bookkeeping for one spec.
struct InstanceRecord {
    state: InstanceState,
    started_at: Option<Instant>,
    restarts: RestartWindow,
    last_error: Option<String>,
    healthy: Option<bool>,
    handle: Option<InstanceHandle>,
}

impl InstanceRecord {
    fn new(budget: u32, window: Duration) -> Self {
        Self {
            state: InstanceState::Starting,
            started_at: None,
            restarts: RestartWindow::new(budget, window),
            last_error: None,
            healthy: None,
            handle: None,
        }
    }
}

/// Status snapshot served to operators.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InstanceStatus {
    pub spec_id: String,
    pub state: InstanceState,
    pub uptime_secs: Option<u64>,
    pub restart_count: u32,
    pub last_error: Option<String>,
    pub healthy: Option<bool>,
}

/// What one reconcile pass did.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReconcileReport {
    pub adopted: Vec<String>,
    pub orphans_stopped: Vec<String>,
    pub deployed: Vec<String>,
    pub errors: Vec<String>,
}

struct SupervisorInner {
    config: FleetConfig,
    secrets: SecretResolver,
    gateway: Gateway,
    memory: Option<Arc<MemoryService>>,
    runtime: ContainerRuntime,
    instances: Mutex<HashMap<String, InstanceRecord>>,
}

/// The fleet owner. Cheap to clone; all operator surfaces drive this same
/// in-process API.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Build the supervisor: resolve nothing lazily — secrets are already
    /// resolved, and every bot identity is registered with the gateway up
    /// front so duplicate tokens fail before any connection is opened.
    pub fn new(
        config: FleetConfig,
        secrets: SecretResolver,
        memory: Option<Arc<MemoryService>>,
        runtime: ContainerRuntime,
    ) -> Result<Self> {
        let gateway = Gateway::new(GatewayConfig {
            event_buffer: config.global.event_buffer,
            request_timeout: Duration::from_secs(config.global.gateway_timeout_secs),
        });

        for (id, spec) in &config.agents {
            let token = secrets.get(&spec.discord_token_ref)?;
            gateway.register(id, token)?;
        }

        Ok(Self {
            inner: Arc::new(SupervisorInner {
                config,
                secrets,
                gateway,
                memory,
                runtime,
                instances: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The shared gateway, for serving the HTTP surface.
    pub fn gateway(&self) -> Gateway {
        self.inner.gateway.clone()
    }

    /// Configured listen address for the gateway HTTP surface.
    pub fn gateway_listen(&self) -> String {
        self.inner.config.global.gateway_listen.clone()
    }

    /// Container engine reachability. Containers cannot deploy without it;
    /// process agents are unaffected.
    pub async fn engine_health(&self) -> Result<()> {
        self.inner.runtime.health().await
    }

    /// Open all Discord connections and start the periodic health probes.
    pub fn start(&self) -> JoinHandle<()> {
        self.inner.gateway.connect_all();
        self.spawn_probe_loop()
    }

    /// Declared specs, in stable order.
    pub fn list_specs(&self) -> Vec<AgentSpec> {
        self.inner.config.agents.values().cloned().collect()
    }

    /// Current instance statuses, in stable order.
    pub fn list_instances(&self) -> Vec<InstanceStatus> {
        let instances = self.inner.instances.lock();
        let mut out: BTreeMap<String, InstanceStatus> = BTreeMap::new();
        for (id, record) in instances.iter() {
            out.insert(id.clone(), snapshot(id, record));
        }
        out.into_values().collect()
    }

    /// Status of one spec, or of the whole fleet.
    pub fn status(&self, spec_id: Option<&str>) -> Result<Vec<InstanceStatus>> {
        match spec_id {
            None => Ok(self.list_instances()),
            Some(id) => {
                let instances = self.inner.instances.lock();
                let record = instances
                    .get(id)
                    .ok_or_else(|| MusterError::Agent(format!("no instance for '{id}'")))?;
                Ok(vec![snapshot(id, record)])
            }
        }
    }

    fn spec(&self, spec_id: &str) -> Result<AgentSpec> {
        self.inner
            .config
            .agents
            .get(spec_id)
            .cloned()
            .ok_or_else(|| MusterError::Config(format!("unknown spec '{spec_id}'")))
    }

    /// Deploy one declared spec. Requires no live instance for it.
    pub async fn deploy(&self, spec_id: &str) -> Result<()> {
        let spec = self.spec(spec_id)?;

        {
            let mut instances = self.inner.instances.lock();
            match instances.get_mut(spec_id) {
                // A handleless `starting` record means another deploy is in
                // flight for this spec; deployments are serialized per spec.
                Some(record)
                    if record.state == InstanceState::Starting
                        || (record.state.is_live() && record.handle.is_some()) =>
                {
                    return Err(MusterError::Agent(format!(
                        "'{spec_id}' already has a live instance ({})",
                        record.state
                    )));
                }
                Some(record) => {
                    record.state = InstanceState::Starting;
                    record.started_at = Some(Instant::now());
                    record.last_error = None;
                    record.healthy = None;
                }
                None => {
                    let mut record = InstanceRecord::new(
                        self.inner.config.global.restart_budget,
                        Duration::from_secs(self.inner.config.global.restart_window_secs),
                    );
                    record.started_at = Some(Instant::now());
                    instances.insert(spec_id.to_string(), record);
                }
            }
        }

        let launched = match spec.kind {
            AgentKind::Process => self.launch_process(&spec).await,
            AgentKind::Container => self.launch_container(&spec).await,
        };

        match launched {
            Ok(handle) => {
                let stored = {
                    let mut instances = self.inner.instances.lock();
                    match instances.get_mut(spec_id) {
                        Some(record) if record.state == InstanceState::Starting => {
                            record.handle = Some(handle);
                            None
                        }
                        // A stop raced the launch; the fresh handle must not
                        // outlive the decision.
                        _ => Some(handle),
                    }
                };
                if let Some(handle) = stored {
                    warn!(spec = spec_id, "instance stopped during launch, tearing down");
                    self.teardown_handle(handle, 5).await;
                    return Ok(());
                }
                self.spawn_promotion(spec_id.to_string());
                info!(spec = spec_id, "instance deployed");
                Ok(())
            }
            Err(e) => {
                let mut instances = self.inner.instances.lock();
                if let Some(record) = instances.get_mut(spec_id) {
                    record.state = InstanceState::Failed;
                    record.last_error = Some(e.to_string());
                }
                error!(spec = spec_id, error = %e, "deploy failed");
                Err(e)
            }
        }
    }

    async fn launch_process(&self, spec: &AgentSpec) -> Result<InstanceHandle> {
        let api_key = self
            .inner
            .secrets
            .api_key_for(spec.llm.provider)?
            .to_string();
        let provider = build_provider(
            spec.llm.provider,
            api_key,
            Duration::from_secs(self.inner.config.global.llm_timeout_secs),
        );

        let engine = ConversationEngine::new(
            spec.clone(),
            Arc::new(self.inner.gateway.clone()) as Arc<dyn ChatSurface>,
            self.inner.memory.clone(),
            provider,
            &self.inner.config.global.log_root,
            EngineConfig {
                llm_timeout: Duration::from_secs(self.inner.config.global.llm_timeout_secs),
                idle_eviction: Duration::from_secs(self.inner.config.global.idle_eviction_secs),
            },
        )?;
        let stats = engine.stats();
        let log = engine.log_handle();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(engine.run(shutdown_rx));

        Ok(InstanceHandle::Process {
            stats,
            shutdown,
            task,
            log,
        })
    }

    async fn launch_container(&self, spec: &AgentSpec) -> Result<InstanceHandle> {
        let resources = spec.resources.clone().ok_or_else(|| {
            MusterError::Config(format!("container spec '{}' has no resources", spec.id))
        })?;

        let token = self.inner.secrets.get(&spec.discord_token_ref)?.to_string();
        let api_key_name = SecretResolver::api_key_name(spec.llm.provider);
        let api_key = self.inner.secrets.api_key_for(spec.llm.provider)?.to_string();

        let mut env: BTreeMap<String, String> = BTreeMap::new();
        env.insert("DISCORD_TOKEN".into(), token);
        env.insert(api_key_name.into(), api_key);
        env.insert("AGENT_NAME".into(), spec.name().to_string());
        env.insert("AGENT_PERSONALITY".into(), spec.personality.clone());
        env.insert(
            "MUSTER_GATEWAY_URL".into(),
            format!("http://{}", self.inner.config.global.gateway_listen),
        );
        env.insert(
            "WORKSPACE_PATH".into(),
            resources.workspace_mount_path.clone(),
        );
        for (k, v) in &resources.env_overrides {
            env.insert(k.clone(), v.clone());
        }

        let mut mounts = vec![Mount {
            host_path: resources.workspace_host_path.clone(),
            container_path: resources.workspace_mount_path.clone(),
            read_only: false,
        }];
        if let Ok(home) = std::env::var("HOME") {
            let ssh = std::path::Path::new(&home).join(".ssh");
            if ssh.exists() {
                mounts.push(Mount {
                    host_path: ssh,
                    container_path: "/root/.ssh".into(),
                    read_only: true,
                });
            }
        }
        for extra in &resources.extra_mounts {
            mounts.push(Mount {
                host_path: extra.host_path.clone(),
                container_path: extra.container_path.clone(),
                read_only: extra.read_only,
            });
        }

        let launch = LaunchSpec {
            agent_id: spec.id.clone(),
            image: resources.image.clone(),
            env,
            mounts,
            labels: resources.labels.clone().into_iter().collect(),
            restart_policy: resources.restart_policy.clone(),
            network: self.inner.config.global.container_network.clone(),
            workdir: Some(resources.workspace_mount_path.clone()),
        };

        let handle = self.inner.runtime.launch(&launch).await?;
        Ok(InstanceHandle::Container(handle))
    }

    /// Promote `starting → running` once the first health signal lands
    /// within the startup timeout; otherwise treat it as a crash.
    fn spawn_promotion(&self, spec_id: String) {
        let supervisor = self.clone();
        let timeout = Duration::from_secs(supervisor.inner.config.global.startup_timeout_secs);
        tokio::spawn(async move {
            let deadline = Instant::now() + timeout;
            loop {
                if Instant::now() >= deadline {
                    supervisor
                        .handle_crash(&spec_id, "no successful health probe within startup_timeout")
                        .await;
                    return;
                }
                match supervisor.probe_once(&spec_id).await {
                    Some(true) => {
                        let mut instances = supervisor.inner.instances.lock();
                        if let Some(record) = instances.get_mut(&spec_id) {
                            if record.state == InstanceState::Starting {
                                record.state = InstanceState::Running;
                                record.healthy = Some(true);
                                info!(spec = %spec_id, "instance running");
                            }
                        }
                        return;
                    }
                    Some(false) => {}
                    None => return, // stopped or gone meanwhile
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });
    }

    /// One health evaluation. `None` means the instance is not in a
    /// probeable state.
    async fn probe_once(&self, spec_id: &str) -> Option<bool> {
        let spec = self.inner.config.agents.get(spec_id)?;
        enum Probe {
            Process {
                alive: bool,
                subscribed: bool,
                events: u64,
                uptime: Duration,
            },
            Container(ContainerHandle),
        }

        let probe = {
            let instances = self.inner.instances.lock();
            let record = instances.get(spec_id)?;
            if !matches!(
                record.state,
                InstanceState::Starting | InstanceState::Running
            ) {
                return None;
            }
            match record.handle.as_ref()? {
                InstanceHandle::Process { stats, task, .. } => Probe::Process {
                    alive: !task.is_finished(),
                    subscribed: stats.is_subscribed(),
                    events: stats.events_seen(),
                    uptime: record
                        .started_at
                        .map(|t| t.elapsed())
                        .unwrap_or(Duration::ZERO),
                },
                InstanceHandle::Container(handle) => Probe::Container(handle.clone()),
            }
        };

        let healthy = match probe {
            Probe::Process {
                alive,
                subscribed,
                events,
                uptime,
            } => {
                // Liveness: task alive, subscription active, and either the
                // loop has consumed traffic or it has not been idle long
                // enough to be suspicious.
                let idle_ok = events > 0
                    || uptime
                        < Duration::from_secs(self.inner.config.global.idle_eviction_secs);
                alive && subscribed && idle_ok
            }
            Probe::Container(handle) => {
                let running = match self.inner.runtime.inspect(&handle).await {
                    Ok(status) => status.running,
                    Err(e) => {
                        debug!(spec = spec_id, error = %e, "container inspect failed");
                        false
                    }
                };
                let probe_ok = if running {
                    match &spec.resources {
                        Some(res) if !res.probe_command.is_empty() => {
                            match self.inner.runtime.exec(&handle, &res.probe_command).await {
                                Ok(result) => result.exit_code == 0,
                                Err(_) => false,
                            }
                        }
                        _ => true,
                    }
                } else {
                    false
                };
                running && probe_ok
            }
        };

        {
            let mut instances = self.inner.instances.lock();
            if let Some(record) = instances.get_mut(spec_id) {
                record.healthy = Some(healthy);
            }
        }
        Some(healthy)
    }

    /// One probe pass over every live instance. Public so operators (and
    /// tests) can force a cycle outside the timer.
    pub async fn probe_cycle(&self) {
        let ids: Vec<String> = {
            let instances = self.inner.instances.lock();
            instances
                .iter()
                .filter(|(_, r)| {
                    matches!(r.state, InstanceState::Starting | InstanceState::Running)
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            if let Some(false) = self.probe_once(&id).await {
                // Starting instances get the startup window before the
                // promotion task calls crash on them.
                let starting = {
                    let instances = self.inner.instances.lock();
                    instances
                        .get(&id)
                        .map(|r| r.state == InstanceState::Starting)
                        .unwrap_or(false)
                };
                if !starting {
                    self.handle_crash(&id, "health probe failed").await;
                }
            }
        }
    }

    fn spawn_probe_loop(&self) -> JoinHandle<()> {
        let supervisor = self.clone();
        let interval = Duration::from_secs(supervisor.inner.config.global.probe_interval_secs);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;
            loop {
                timer.tick().await;
                supervisor.probe_cycle().await;
            }
        })
    }

    /// Crash path: tear down the handle, then either restart under the
    /// budget or park the instance in `failed`.
    async fn handle_crash(&self, spec_id: &str, reason: &str) {
        let (handle, allowed) = {
            let mut instances = self.inner.instances.lock();
            let Some(record) = instances.get_mut(spec_id) else {
                return;
            };
            if !matches!(
                record.state,
                InstanceState::Starting | InstanceState::Running | InstanceState::CrashLoop
            ) {
                return;
            }
            record.state = InstanceState::CrashLoop;
            record.last_error = Some(reason.to_string());
            record.healthy = Some(false);
            (record.handle.take(), record.restarts.try_record())
        };

        warn!(spec = spec_id, reason, restart = allowed, "instance crashed");
        if let Some(handle) = handle {
            self.teardown_handle(handle, 5).await;
        }

        if !allowed {
            let mut instances = self.inner.instances.lock();
            if let Some(record) = instances.get_mut(spec_id) {
                record.state = InstanceState::Failed;
            }
            error!(spec = spec_id, "restart budget exhausted, instance failed");
            return;
        }

        let backoff = {
            let mut instances = self.inner.instances.lock();
            instances
                .get_mut(spec_id)
                .map(|r| r.restarts.backoff())
                .unwrap_or(Duration::from_secs(1))
        };
        tokio::time::sleep(backoff).await;

        if let Err(e) = self.deploy(spec_id).await {
            warn!(spec = spec_id, error = %e, "restart attempt failed");
        }
    }

    async fn teardown_handle(&self, handle: InstanceHandle, grace_secs: u64) {
        match handle {
            InstanceHandle::Process {
                shutdown, task, ..
            } => {
                let _ = shutdown.send(true);
                let abort = task.abort_handle();
                match tokio::time::timeout(Duration::from_secs(grace_secs), task).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => debug!(error = %e, "engine exited with error"),
                    Ok(Err(e)) if !e.is_cancelled() => warn!(error = %e, "engine task panicked"),
                    Ok(Err(_)) => {}
                    Err(_) => {
                        // Grace elapsed; in-flight work is abandoned.
                        abort.abort();
                    }
                }
            }
            InstanceHandle::Container(container) => {
                if let Err(e) = self.inner.runtime.stop(&container, grace_secs, true).await {
                    warn!(container = %container.name, error = %e, "container stop failed");
                }
            }
        }
    }

    /// Graceful stop. Idempotent: stopping a stopped instance is a no-op
    /// that reports `stopped`.
    pub async fn stop(&self, spec_id: &str, grace_secs: u64) -> Result<InstanceState> {
        let handle = {
            let mut instances = self.inner.instances.lock();
            let Some(record) = instances.get_mut(spec_id) else {
                return Ok(InstanceState::Stopped);
            };
            if record.state.is_terminal() {
                return Ok(record.state);
            }
            record.state = InstanceState::Stopping;
            record.handle.take()
        };

        if let Some(handle) = handle {
            // A process handle that has already exited still counts as a
            // clean stop; the task result is drained either way.
            if let InstanceHandle::Process { ref task, .. } = handle {
                if task.is_finished() {
                    debug!(spec = spec_id, "engine already exited");
                }
            }
            self.teardown_handle(handle, grace_secs).await;
        }

        let mut instances = self.inner.instances.lock();
        if let Some(record) = instances.get_mut(spec_id) {
            record.state = InstanceState::Stopped;
            record.healthy = None;
        }
        info!(spec = spec_id, "instance stopped");
        Ok(InstanceState::Stopped)
    }

    /// `stop` then `deploy`, preserving the spec.
    pub async fn restart(&self, spec_id: &str, grace_secs: u64) -> Result<()> {
        let _ = self.spec(spec_id)?;
        self.stop(spec_id, grace_secs).await?;
        self.deploy(spec_id).await
    }

    /// Log tail: the per-agent rotating file for process agents, container
    /// logs otherwise.
    pub async fn logs(&self, spec_id: &str, tail: usize) -> Result<String> {
        let spec = self.spec(spec_id)?;
        let container = {
            let instances = self.inner.instances.lock();
            match instances.get(spec_id).and_then(|r| r.handle.as_ref()) {
                Some(InstanceHandle::Process { log, .. }) => {
                    return Ok(log.tail(tail).join("\n"));
                }
                Some(InstanceHandle::Container(handle)) => Some(handle.clone()),
                None => None,
            }
        };
        match (spec.kind, container) {
            (_, Some(handle)) => self.inner.runtime.logs(&handle, tail).await,
            (AgentKind::Process, None) => {
                // No live handle; read the file the last run left behind.
                let log = AgentLog::open(&self.inner.config.global.log_root, spec_id)?;
                Ok(log.tail(tail).join("\n"))
            }
            (AgentKind::Container, None) => {
                let handle = ContainerHandle {
                    id: String::new(),
                    name: muster_container::container_name(spec_id),
                };
                self.inner.runtime.logs(&handle, tail).await
            }
        }
    }

    /// Re-observe managed containers by label selector and adopt the ones
    /// matching a declared spec. This is how the instance map is rebuilt
    /// after a supervisor restart; there is no on-disk checkpoint. Returns
    /// orphan handles (managed containers with no matching spec).
    pub async fn observe(&self) -> (Vec<String>, Vec<ContainerHandle>) {
        let mut adopted = Vec::new();
        let mut orphans = Vec::new();

        let observed = match self
            .inner
            .runtime
            .list(&format!("{LABEL_MANAGED}=true"))
            .await
        {
            Ok(observed) => observed,
            Err(e) => {
                // Engine unreachable is a fleet-level condition: reported,
                // retried next pass, never fatal.
                debug!(error = %e, "container observation skipped");
                return (adopted, orphans);
            }
        };

        for handle in observed {
            let label = self.inner.runtime.agent_label(&handle).await.ok().flatten();
            match label {
                Some(agent_id) if self.inner.config.agents.contains_key(&agent_id) => {
                    let mut instances = self.inner.instances.lock();
                    let live = instances
                        .get(&agent_id)
                        .map(|r| r.state.is_live())
                        .unwrap_or(false);
                    if !live {
                        let mut record = InstanceRecord::new(
                            self.inner.config.global.restart_budget,
                            Duration::from_secs(self.inner.config.global.restart_window_secs),
                        );
                        record.state = InstanceState::Running;
                        record.started_at = Some(Instant::now());
                        record.handle = Some(InstanceHandle::Container(handle.clone()));
                        instances.insert(agent_id.clone(), record);
                        drop(instances);
                        info!(spec = %agent_id, container = %handle.name, "adopted running container");
                        adopted.push(agent_id);
                    }
                }
                _ => orphans.push(handle),
            }
        }
        (adopted, orphans)
    }

    /// Idempotent convergence: adopt containers that already exist, stop
    /// orphans with no matching spec, deploy `auto_deploy` specs without a
    /// live instance.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let (adopted, orphans) = self.observe().await;
        report.adopted = adopted;
        for handle in orphans {
            warn!(container = %handle.name, "stopping orphan container");
            if let Err(e) = self.inner.runtime.stop(&handle, 10, true).await {
                report.errors.push(format!("orphan {}: {e}", handle.name));
            } else {
                report.orphans_stopped.push(handle.name);
            }
        }

        let candidates: Vec<String> = self
            .inner
            .config
            .agents
            .iter()
            .filter(|(_, spec)| spec.auto_deploy)
            .map(|(id, _)| id.clone())
            .collect();
        for id in candidates {
            let live = {
                let instances = self.inner.instances.lock();
                instances.get(&id).map(|r| r.state.is_live()).unwrap_or(false)
            };
            if live {
                continue;
            }
            match self.deploy(&id).await {
                Ok(()) => report.deployed.push(id),
                Err(e) => report.errors.push(format!("{id}: {e}")),
            }
        }

        report
    }

    /// Graceful fleet shutdown: agents drain, then the gateway closes its
    /// subscriptions and bot connections.
    pub async fn shutdown(&self, grace_secs: u64) {
        let ids: Vec<String> = {
            let instances = self.inner.instances.lock();
            instances
                .iter()
                .filter(|(_, r)| !r.state.is_terminal())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            if let Err(e) = self.stop(&id, grace_secs).await {
                warn!(spec = %id, error = %e, "stop during shutdown failed");
            }
        }
        self.inner.gateway.close();
    }
}

fn snapshot(id: &str, record: &InstanceRecord) -> InstanceStatus {
    InstanceStatus {
        spec_id: id.to_string(),
        state: record.state,
        uptime_secs: match record.state {
            InstanceState::Starting | InstanceState::Running => {
                record.started_at.map(|t| t.elapsed().as_secs())
            }
            _ => None,
        },
        restart_count: {
            // Count without mutating the shared window: expired entries are
            // still pruned on the next try_record.
            record.restarts_snapshot()
        },
        last_error: record.last_error.clone(),
        healthy: record.healthy,
    }
}

impl InstanceRecord {
    fn restarts_snapshot(&self) -> u32 {
        // The window prunes lazily; a snapshot may briefly over-count
        // expired restarts, which is harmless for status display.
        self.restarts.len_unpruned()
    }
}
