use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file attached to a Discord message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub filename: String,
    pub url: String,
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// One inbound Discord message, as fanned out to subscribers of a bot
/// identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Logical name of the bot identity this event was received on.
    pub bot: String,
    pub channel_id: String,
    /// Present when the message was posted inside a thread; `channel_id`
    /// then names the parent channel.
    pub thread_id: Option<String>,
    pub message_id: String,
    pub author_id: String,
    pub author_name: String,
    pub is_bot_author: bool,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentInfo>,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    /// The unit across which turn limits and context apply: the thread when
    /// present, otherwise the channel.
    pub fn conversation_key(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.channel_id)
    }

    /// The channel-or-thread id replies should be posted to.
    pub fn reply_channel(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.channel_id)
    }
}

/// A message fetched from Discord channel history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub author_name: String,
    pub is_bot: bool,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Who produced a chat turn sent to a language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single turn in a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}
