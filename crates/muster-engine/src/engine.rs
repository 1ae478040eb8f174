use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use muster_core::{AgentSpec, InboundEvent, MusterError, Result};
use muster_llm::{ChatProvider, ChatRequest};
use muster_memory::MemoryService;

use crate::context;
use crate::logfile::AgentLog;
use crate::stats::EngineStats;
use crate::surface::ChatSurface;

/// How many memories a turn recalls.
const MEMORY_K: usize = 5;

/// Engine-level tuning shared across agents.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for one provider call.
    pub llm_timeout: Duration,
    /// Conversation state older than this is evicted.
    pub idle_eviction: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm_timeout: Duration::from_secs(60),
            idle_eviction: Duration::from_secs(3600),
        }
    }
}

/// Per conversation-key bookkeeping. Owned exclusively by the engine loop.
struct ConversationState {
    turn_count: u32,
    last_reply_at: Instant,
}

/// One agent's conversation loop. Single writer: events for this agent are
/// processed serially, which preserves reply ordering per conversation key.
pub struct ConversationEngine {
    spec: AgentSpec,
    surface: Arc<dyn ChatSurface>,
    memory: Option<Arc<MemoryService>>,
    provider: Arc<dyn ChatProvider>,
    config: EngineConfig,
    stats: Arc<EngineStats>,
    log: Arc<AgentLog>,
    conversations: HashMap<String, ConversationState>,
}

impl ConversationEngine {
    pub fn new(
        spec: AgentSpec,
        surface: Arc<dyn ChatSurface>,
        memory: Option<Arc<MemoryService>>,
        provider: Arc<dyn ChatProvider>,
        log_root: &Path,
        config: EngineConfig,
    ) -> Result<Self> {
        let log = Arc::new(AgentLog::open(log_root, &spec.id)?);
        Ok(Self {
            spec,
            surface,
            memory,
            provider,
            config,
            stats: Arc::new(EngineStats::new()),
            log,
            conversations: HashMap::new(),
        })
    }

    /// Shared liveness counters, read by the supervisor's probes.
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Handle to the per-agent rotating log, for `logs <spec_id>`.
    pub fn log_handle(&self) -> Arc<AgentLog> {
        Arc::clone(&self.log)
    }

    /// Run until shutdown is signalled or the subscription ends.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut feed = self.surface.subscribe(&self.spec.id)?;
        self.stats.mark_subscribed();
        info!(agent = %self.spec.id, "conversation engine started");
        self.log.line("engine started");

        if self.spec.behavior.announce_on_start {
            self.announce().await;
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = feed.next() => {
                    match event {
                        Some(event) => {
                            self.stats.mark_event();
                            self.handle_event(event).await;
                            self.evict_idle_conversations();
                        }
                        None => {
                            warn!(agent = %self.spec.id, "event feed closed");
                            return Err(MusterError::HandleLost(format!(
                                "subscription for '{}' ended", self.spec.id
                            )));
                        }
                    }
                }
            }
        }

        info!(agent = %self.spec.id, "conversation engine stopped");
        self.log.line("engine stopped");
        Ok(())
    }

    /// Post the online announcement to the first allowlisted channel.
    async fn announce(&self) {
        let Some(channel) = self.spec.behavior.channel_allowlist.first() else {
            debug!(agent = %self.spec.id, "no allowlisted channel for announcement");
            return;
        };
        let text = format!(
            "🤖 {} is now online and ready to chat! Powered by {}.",
            self.spec.name(),
            self.spec.llm.provider
        );
        match self.surface.send(&self.spec.id, channel, &text, None).await {
            Ok(_) => self.log.line("announced online"),
            Err(e) => warn!(agent = %self.spec.id, error = %e, "announcement failed"),
        }
    }

    /// Admission filters, self-check first. Returns the rejection reason.
    fn admission_reject(&self, event: &InboundEvent) -> Option<&'static str> {
        // Self-reply cut-off comes first, unconditionally.
        if let Some(own_id) = self.surface.bot_user_id(&self.spec.id) {
            if event.author_id == own_id {
                return Some("own message");
            }
        }

        let behavior = &self.spec.behavior;
        if event.is_bot_author
            && behavior.ignore_bots
            && !behavior.bot_allowlist.contains(&event.author_id)
        {
            return Some("bot not in allowlist");
        }

        if !behavior.channel_allowlist.is_empty()
            && !behavior.channel_allowlist.contains(&event.channel_id)
        {
            return Some("channel not allowed");
        }

        if behavior.require_mention {
            let mentioned = self
                .surface
                .bot_user_id(&self.spec.id)
                .is_some_and(|id| event.content.contains(&format!("<@{id}>")));
            if !mentioned {
                return Some("not mentioned");
            }
        }

        let key = event.conversation_key();
        let turns = self
            .conversations
            .get(key)
            .map(|c| c.turn_count)
            .unwrap_or(0);
        if turns >= behavior.max_turns_per_thread {
            return Some("max turns reached");
        }

        None
    }

    async fn handle_event(&mut self, event: InboundEvent) {
        if let Some(reason) = self.admission_reject(&event) {
            debug!(
                agent = %self.spec.id,
                author = %event.author_name,
                reason,
                "event filtered"
            );
            return;
        }

        // Pace chatter before spending provider tokens.
        let delay = self.spec.behavior.response_delay_seconds;
        if delay > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }

        match self.run_turn(&event).await {
            Ok(message_id) => {
                self.stats.mark_reply();
                let key = event.conversation_key().to_string();
                let state = self
                    .conversations
                    .entry(key)
                    .or_insert_with(|| ConversationState {
                        turn_count: 0,
                        last_reply_at: Instant::now(),
                    });
                state.turn_count += 1;
                state.last_reply_at = Instant::now();
                self.log.line(&format!(
                    "replied in {} (message {message_id}, turn {})",
                    event.conversation_key(),
                    state.turn_count
                ));
            }
            Err(e) => {
                self.stats.mark_aborted_turn();
                warn!(agent = %self.spec.id, error = %e, "turn aborted");
                self.log.line(&format!("turn aborted: {e}"));
            }
        }
    }

    /// One full turn: context, recall, provider call, reply, memorize.
    async fn run_turn(&mut self, event: &InboundEvent) -> Result<String> {
        // Discord is the source of truth for recent history.
        let history = if self.spec.behavior.max_context_messages > 0 {
            self.surface
                .history(
                    &self.spec.id,
                    event.reply_channel(),
                    self.spec.behavior.max_context_messages,
                )
                .await
                .unwrap_or_else(|e| {
                    debug!(agent = %self.spec.id, error = %e, "history fetch failed");
                    vec![]
                })
        } else {
            vec![]
        };

        // Memory recall degrades silently: a turn still replies when the
        // embedding endpoint is down.
        let memories = match &self.memory {
            Some(memory) => match memory
                .search(Some(&self.spec.id), &event.content, Some(MEMORY_K))
                .await
            {
                Ok(hits) => {
                    let floor = self.spec.behavior.memory_similarity_floor;
                    hits.into_iter()
                        .filter(|h| h.similarity >= floor)
                        .collect()
                }
                Err(e) => {
                    debug!(agent = %self.spec.id, error = %e, "memory recall unavailable");
                    vec![]
                }
            },
            None => vec![],
        };

        let own_user_id = self.surface.bot_user_id(&self.spec.id);
        let request = ChatRequest {
            model: self.spec.llm.model.clone(),
            system: Some(context::build_system_prompt(&self.spec, &memories, event)),
            messages: context::build_messages(&history, own_user_id.as_deref(), event),
            max_tokens: 1024,
            temperature: 0.7,
            extra_params: self.spec.llm.extra_params.clone(),
        };

        let reply = self.complete_with_retry(&request).await?;
        let reply = context::cleanup_reply(self.spec.name(), &reply);
        if reply.is_empty() {
            return Err(MusterError::Provider("empty reply after cleanup".into()));
        }

        // Reply in place unless the operator asked for a fresh thread.
        let target = if self.spec.behavior.create_thread_on_reply && event.thread_id.is_none() {
            let name: String = event.content.chars().take(40).collect();
            self.surface
                .create_thread(&self.spec.id, &event.channel_id, &event.message_id, &name)
                .await?
        } else {
            event.reply_channel().to_string()
        };
        let reply_to = if target == event.reply_channel() {
            Some(event.message_id.as_str())
        } else {
            None // the new thread already hangs off the triggering message
        };

        let message_id = self
            .surface
            .send(&self.spec.id, &target, &reply, reply_to)
            .await?;

        self.memorize(event, &reply, &message_id).await;
        Ok(message_id)
    }

    /// Provider call under the configured deadline, with one retry on
    /// transient failure. A second failure aborts the turn.
    async fn complete_with_retry(&self, request: &ChatRequest) -> Result<String> {
        let first = self.call_provider(request).await;
        match first {
            Ok(text) => Ok(text),
            Err(e) if muster_llm::is_retryable(&e) => {
                let delay = e.retry_after_secs().unwrap_or(1);
                warn!(
                    agent = %self.spec.id,
                    error = %e,
                    delay_secs = delay,
                    "provider call failed, retrying once"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
                self.call_provider(request).await
            }
            Err(e) => Err(e),
        }
    }

    async fn call_provider(&self, request: &ChatRequest) -> Result<String> {
        tokio::time::timeout(self.config.llm_timeout, self.provider.complete(request))
            .await
            .map_err(|_| MusterError::Provider("provider call timed out".into()))?
    }

    /// Record the user turn and the reply as two memories. Failures degrade
    /// to a debug log; the reply already went out.
    async fn memorize(&self, event: &InboundEvent, reply: &str, reply_id: &str) {
        let Some(memory) = &self.memory else { return };

        let base = serde_json::json!({
            "channel_id": event.channel_id,
            "thread_id": event.thread_id,
        });

        let mut user_meta = base.clone();
        user_meta["message_id"] = serde_json::json!(event.message_id);
        user_meta["role"] = serde_json::json!("user");
        let user_turn = format!("{}: {}", event.author_name, event.content);
        if let Err(e) = memory.store(&self.spec.id, &user_turn, user_meta).await {
            debug!(agent = %self.spec.id, error = %e, "skipped memorizing user turn");
        }

        let mut reply_meta = base;
        reply_meta["message_id"] = serde_json::json!(reply_id);
        reply_meta["role"] = serde_json::json!("assistant");
        let reply_turn = format!("{}: {}", self.spec.name(), reply);
        if let Err(e) = memory.store(&self.spec.id, &reply_turn, reply_meta).await {
            debug!(agent = %self.spec.id, error = %e, "skipped memorizing reply");
        }
    }

    fn evict_idle_conversations(&mut self) {
        let ttl = self.config.idle_eviction;
        self.conversations
            .retain(|_, state| state.last_reply_at.elapsed() < ttl);
    }
}
