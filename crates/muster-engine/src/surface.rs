//! The engine-facing slice of the gateway. The conversation loop never
//! opens its own Discord connection; everything goes through this trait,
//! which the in-process [`muster_gateway::Gateway`] implements directly.

use async_trait::async_trait;

use muster_core::{ChannelMessage, InboundEvent, Result};

/// A pull-style, ordered stream of one identity's inbound events.
#[async_trait]
pub trait EventFeed: Send {
    /// Next event, or `None` when the identity is gone.
    async fn next(&mut self) -> Option<InboundEvent>;
}

/// Outbound operations an agent needs from the gateway.
#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// Open an independent subscription to a bot identity's events.
    fn subscribe(&self, bot: &str) -> Result<Box<dyn EventFeed>>;

    /// The identity's discovered Discord user id, once connected.
    fn bot_user_id(&self, bot: &str) -> Option<String>;

    /// Post a message; returns the new message id.
    async fn send(
        &self,
        bot: &str,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<String>;

    /// Recent channel history, oldest → newest.
    async fn history(
        &self,
        bot: &str,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>>;

    /// Spawn a thread from a message; returns the thread id.
    async fn create_thread(
        &self,
        bot: &str,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String>;
}

#[async_trait]
impl EventFeed for muster_gateway::identity::EventStream {
    async fn next(&mut self) -> Option<InboundEvent> {
        muster_gateway::identity::EventStream::next(self).await
    }
}

#[async_trait]
impl ChatSurface for muster_gateway::Gateway {
    fn subscribe(&self, bot: &str) -> Result<Box<dyn EventFeed>> {
        Ok(Box::new(muster_gateway::Gateway::subscribe(self, bot)?))
    }

    fn bot_user_id(&self, bot: &str) -> Option<String> {
        muster_gateway::Gateway::bot_user_id(self, bot)
    }

    async fn send(
        &self,
        bot: &str,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<String> {
        muster_gateway::Gateway::send(self, bot, channel_id, content, reply_to).await
    }

    async fn history(
        &self,
        bot: &str,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>> {
        self.messages(bot, channel_id, limit, None).await
    }

    async fn create_thread(
        &self,
        bot: &str,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String> {
        muster_gateway::Gateway::create_thread(self, bot, channel_id, message_id, name).await
    }
}
