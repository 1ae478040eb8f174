//! # muster-gateway
//!
//! The single shared Discord-facing service. One process holds a live
//! gateway connection per registered bot token; every other component goes
//! through this crate — in-process via [`Gateway`], or over the stateless
//! HTTP surface in [`http`].
//!
//! Inbound traffic fans out per identity: each subscriber gets every event
//! in receive order through its own bounded buffer; slow subscribers lose
//! the oldest events and the loss is counted, never fatal.

pub mod connection;
pub mod http;
pub mod identity;
pub mod rest;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use muster_core::{
    AttachmentInfo, ChannelMessage, ConnectionState, InboundEvent, MusterError, Result,
};

use identity::{BotIdentity, BotSummary, EventStream};
use rest::DiscordRest;

/// Gateway tuning.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bounded fan-out buffer per subscription; overflow drops oldest.
    pub event_buffer: usize,
    /// Per-call deadline for Discord REST requests.
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            request_timeout: Duration::from_secs(30),
        }
    }
}

struct GatewayInner {
    identities: RwLock<HashMap<String, Arc<BotIdentity>>>,
    rest: DiscordRest,
    event_buffer: usize,
}

/// Shared handle to the gateway core. Cheap to clone; the HTTP surface and
/// every conversation engine hold one.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                identities: RwLock::new(HashMap::new()),
                rest: DiscordRest::new(config.request_timeout),
                event_buffer: config.event_buffer,
            }),
        }
    }

    /// Register a bot identity under its logical name. Two identities
    /// sharing one token is a configuration error.
    pub fn register(&self, name: &str, token: &str) -> Result<()> {
        let mut identities = self.inner.identities.write();
        for (existing, identity) in identities.iter() {
            if identity.token() == token {
                return Err(MusterError::DuplicateBotToken {
                    first: existing.clone(),
                    second: name.to_string(),
                });
            }
        }
        if identities.contains_key(name) {
            return Err(MusterError::Config(format!(
                "bot identity '{name}' registered twice"
            )));
        }
        identities.insert(
            name.to_string(),
            Arc::new(BotIdentity::new(name, token, self.inner.event_buffer)),
        );
        info!(bot = name, "registered bot identity");
        Ok(())
    }

    /// Open every registered identity's connection in parallel. A failure to
    /// connect marks that identity degraded without blocking the rest.
    pub fn connect_all(&self) {
        let identities: Vec<Arc<BotIdentity>> =
            self.inner.identities.read().values().cloned().collect();
        for identity in identities {
            tokio::spawn(connection::run(identity));
        }
    }

    /// Signal every connection task to close.
    pub fn close(&self) {
        for identity in self.inner.identities.read().values() {
            identity.request_shutdown();
        }
    }

    fn identity(&self, bot: &str) -> Result<Arc<BotIdentity>> {
        self.inner
            .identities
            .read()
            .get(bot)
            .cloned()
            .ok_or_else(|| MusterError::UnknownBot(bot.to_string()))
    }

    /// Identity lookup that also enforces the outbound-call contract: only
    /// `ready` identities serve sends; a degraded identity fails fast.
    fn ready_identity(&self, bot: &str) -> Result<Arc<BotIdentity>> {
        let identity = self.identity(bot)?;
        match identity.state() {
            ConnectionState::Ready => Ok(identity),
            state => Err(MusterError::Transport(format!(
                "bot '{bot}' is {state}, not ready"
            ))),
        }
    }

    /// Connection state of an identity, if registered.
    pub fn connection_state(&self, bot: &str) -> Option<ConnectionState> {
        self.inner.identities.read().get(bot).map(|i| i.state())
    }

    /// Discovered Discord user id of an identity's bot account.
    pub fn bot_user_id(&self, bot: &str) -> Option<String> {
        self.inner
            .identities
            .read()
            .get(bot)
            .and_then(|i| i.user_id())
    }

    /// Subscribe to an identity's inbound events. Every subscriber receives
    /// every event; streams are never shared-consumed.
    pub fn subscribe(&self, bot: &str) -> Result<EventStream> {
        Ok(self.identity(bot)?.subscribe())
    }

    /// Fan an event out to an identity's subscribers. This is the delivery
    /// entry point used by connection tasks; tests inject events here.
    pub fn deliver(&self, event: InboundEvent) -> Result<()> {
        let identity = self.identity(&event.bot)?;
        identity.deliver(event);
        Ok(())
    }

    /// Post a message. Returns the new message id.
    pub async fn send(
        &self,
        bot: &str,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<String> {
        let identity = self.ready_identity(bot)?;
        self.inner
            .rest
            .create_message(identity.token(), bot, channel_id, content, reply_to)
            .await
    }

    /// Upload a file, optionally with accompanying text.
    pub async fn send_file(
        &self,
        bot: &str,
        channel_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        content: Option<&str>,
    ) -> Result<String> {
        let identity = self.ready_identity(bot)?;
        self.inner
            .rest
            .upload_file(identity.token(), bot, channel_id, filename, bytes, content)
            .await
    }

    /// Recent channel history, oldest → newest.
    pub async fn messages(
        &self,
        bot: &str,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<ChannelMessage>> {
        let identity = self.ready_identity(bot)?;
        self.inner
            .rest
            .get_messages(identity.token(), bot, channel_id, limit, before)
            .await
    }

    /// Channels visible to a bot, optionally scoped to one guild.
    pub async fn channels(
        &self,
        bot: &str,
        guild_id: Option<&str>,
    ) -> Result<serde_json::Value> {
        let identity = self.ready_identity(bot)?;
        match guild_id {
            Some(g) => {
                self.inner
                    .rest
                    .get_guild_channels(identity.token(), bot, g)
                    .await
            }
            None => self.inner.rest.get_user_guilds(identity.token(), bot).await,
        }
    }

    /// Guild metadata.
    pub async fn guild_info(&self, bot: &str, guild_id: &str) -> Result<serde_json::Value> {
        let identity = self.ready_identity(bot)?;
        self.inner.rest.get_guild(identity.token(), bot, guild_id).await
    }

    /// Attachments carried by one message.
    pub async fn message_attachments(
        &self,
        bot: &str,
        channel_id: &str,
        message_id: &str,
    ) -> Result<Vec<AttachmentInfo>> {
        let identity = self.ready_identity(bot)?;
        self.inner
            .rest
            .get_message_attachments(identity.token(), bot, channel_id, message_id)
            .await
    }

    /// Download one named attachment from a message.
    pub async fn download_attachment(
        &self,
        bot: &str,
        channel_id: &str,
        message_id: &str,
        filename: &str,
    ) -> Result<Vec<u8>> {
        let attachments = self
            .message_attachments(bot, channel_id, message_id)
            .await?;
        let attachment = attachments
            .into_iter()
            .find(|a| a.filename == filename)
            .ok_or_else(|| {
                MusterError::UnknownChannel(format!(
                    "no attachment '{filename}' on message {message_id}"
                ))
            })?;
        self.inner.rest.download(&attachment.url).await
    }

    /// Spawn a thread from an existing message. Returns the thread id.
    pub async fn create_thread(
        &self,
        bot: &str,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String> {
        let identity = self.ready_identity(bot)?;
        self.inner
            .rest
            .start_thread(identity.token(), bot, channel_id, message_id, name)
            .await
    }

    /// All registered identities with their discovered user info and state.
    pub fn bots(&self) -> Vec<BotSummary> {
        let mut bots: Vec<BotSummary> = self
            .inner
            .identities
            .read()
            .values()
            .map(|i| i.summary())
            .collect();
        bots.sort_by(|a, b| a.id.cmp(&b.id));
        bots
    }

    /// Per-identity connection state aggregate plus fan-out drop counters.
    pub fn health(&self) -> GatewayHealth {
        let bots = self.bots();
        let ok = !bots.is_empty() && bots.iter().all(|b| b.state == ConnectionState::Ready);
        GatewayHealth { ok, bots }
    }
}

/// Aggregate health report served by `GET /health`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayHealth {
    pub ok: bool,
    pub bots: Vec<BotSummary>,
}

/// Serve the HTTP surface until the listener fails or the process exits.
pub async fn serve_http(gateway: Gateway, listen: &str) -> Result<()> {
    let router = http::build_router(gateway);
    info!(listen, "starting gateway HTTP surface");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| MusterError::Transport(format!("failed to bind {listen}: {e}")))?;
    axum::serve(listener, router)
        .await
        .map_err(|e| MusterError::Transport(format!("gateway server error: {e}")))?;
    warn!("gateway HTTP surface exited");
    Ok(())
}
