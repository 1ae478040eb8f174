//! Prompt assembly. Inputs are supplied in priority order — system,
//! memories, history, new turn — so a provider that must truncate drops the
//! oldest history first.

use muster_core::{AgentSpec, ChannelMessage, ChatMessage, ChatRole, InboundEvent};
use muster_memory::MemoryHit;

/// System prompt: preamble + personality + suffix + memory block +
/// attachment note.
pub fn build_system_prompt(
    spec: &AgentSpec,
    memories: &[MemoryHit],
    inbound: &InboundEvent,
) -> String {
    let mut prompt = format!(
        "You are {}, a conversational Discord agent.\n\
         You are participating in a Discord conversation. Be conversational, \
         helpful, and engaging. Keep responses concise but informative.\n\
         Do NOT prefix your replies with your own name.",
        spec.name()
    );

    if !spec.personality.is_empty() {
        prompt.push_str("\n\nPersonality: ");
        prompt.push_str(&spec.personality);
    }
    if !spec.system_prompt_suffix.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&spec.system_prompt_suffix);
    }

    if !memories.is_empty() {
        prompt.push_str("\n\n<memory>\n");
        for hit in memories {
            prompt.push_str("- ");
            prompt.push_str(&hit.content);
            prompt.push('\n');
        }
        prompt.push_str("</memory>");
    }

    if !inbound.attachments.is_empty() {
        prompt.push_str("\n\nThe user attached these files to their message:\n");
        for att in &inbound.attachments {
            prompt.push_str(&format!(
                "- {} ({} bytes, {})\n",
                att.filename,
                att.size,
                att.content_type.as_deref().unwrap_or("unknown type")
            ));
        }
    }

    prompt
}

/// History turns plus the triggering message, oldest → newest. Messages
/// authored by this agent's own bot identity become assistant turns;
/// everything else is a user turn tagged with the author's name, mirroring
/// how the conversation reads on Discord.
pub fn build_messages(
    history: &[ChannelMessage],
    own_user_id: Option<&str>,
    inbound: &InboundEvent,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    for msg in history {
        if msg.id == inbound.message_id {
            continue; // the triggering turn is appended last
        }
        let is_self = own_user_id.is_some_and(|id| id == msg.author_id);
        if is_self {
            messages.push(ChatMessage::new(ChatRole::Assistant, msg.content.clone()));
        } else {
            messages.push(ChatMessage::new(
                ChatRole::User,
                format!("{}: {}", msg.author_name, msg.content),
            ));
        }
    }
    messages.push(ChatMessage::new(
        ChatRole::User,
        format!("{}: {}", inbound.author_name, inbound.content),
    ));
    messages
}

/// Strip repeated "Name:" prefixes models sometimes parrot back.
pub fn cleanup_reply(name: &str, reply: &str) -> String {
    let mut out = reply.trim();
    if !name.is_empty() {
        loop {
            let lower = out.to_lowercase();
            let prefix = format!("{}:", name.to_lowercase());
            if lower.starts_with(&prefix) {
                out = out[prefix.len()..].trim_start();
            } else {
                break;
            }
        }
    }
    out.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use muster_core::{AgentKind, BehaviorConfig, LlmConfig, Provider};

    fn spec() -> AgentSpec {
        AgentSpec {
            id: "a1".into(),
            kind: AgentKind::Process,
            display_name: "Grok4Agent".into(),
            personality: "Expert researcher".into(),
            system_prompt_suffix: "Answer in English.".into(),
            llm: LlmConfig {
                provider: Provider::Grok,
                model: "grok-2-1212".into(),
                extra_params: serde_json::Value::Null,
            },
            discord_token_ref: "T".into(),
            behavior: BehaviorConfig::default(),
            resources: None,
            auto_deploy: true,
        }
    }

    fn inbound(content: &str) -> InboundEvent {
        InboundEvent {
            bot: "a1".into(),
            channel_id: "c1".into(),
            thread_id: None,
            message_id: "m9".into(),
            author_id: "u1".into(),
            author_name: "alice".into(),
            is_bot_author: false,
            content: content.into(),
            attachments: vec![],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn system_prompt_carries_personality_and_memories() {
        let memories = vec![muster_memory::MemoryHit {
            id: 1,
            agent_id: "a1".into(),
            content: "alice prefers terse answers".into(),
            similarity: 0.9,
            metadata: serde_json::Value::Null,
            created_at: String::new(),
        }];
        let prompt = build_system_prompt(&spec(), &memories, &inbound("hi"));
        assert!(prompt.contains("Grok4Agent"));
        assert!(prompt.contains("Expert researcher"));
        assert!(prompt.contains("Answer in English."));
        assert!(prompt.contains("alice prefers terse answers"));
    }

    #[test]
    fn no_memories_means_no_memory_block() {
        let prompt = build_system_prompt(&spec(), &[], &inbound("hi"));
        assert!(!prompt.contains("<memory>"));
    }

    #[test]
    fn history_tags_authors_and_marks_own_turns() {
        let history = vec![
            ChannelMessage {
                id: "m1".into(),
                channel_id: "c1".into(),
                author_id: "u1".into(),
                author_name: "alice".into(),
                is_bot: false,
                content: "first".into(),
                timestamp: Utc::now(),
            },
            ChannelMessage {
                id: "m2".into(),
                channel_id: "c1".into(),
                author_id: "bot-7".into(),
                author_name: "Grok4Agent".into(),
                is_bot: true,
                content: "my reply".into(),
                timestamp: Utc::now(),
            },
        ];
        let messages = build_messages(&history, Some("bot-7"), &inbound("third"));
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].content, "alice: first");
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[1].content, "my reply");
        assert_eq!(messages[2].content, "alice: third");
    }

    #[test]
    fn triggering_message_is_not_duplicated_from_history() {
        let history = vec![ChannelMessage {
            id: "m9".into(),
            channel_id: "c1".into(),
            author_id: "u1".into(),
            author_name: "alice".into(),
            is_bot: false,
            content: "hello".into(),
            timestamp: Utc::now(),
        }];
        let messages = build_messages(&history, None, &inbound("hello"));
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn reply_cleanup_strips_repeated_name_prefixes() {
        assert_eq!(
            cleanup_reply("Grok4Agent", "Grok4Agent: Grok4Agent: hi there"),
            "hi there"
        );
        assert_eq!(cleanup_reply("Grok4Agent", "plain reply"), "plain reply");
        assert_eq!(cleanup_reply("", "  padded  "), "padded");
    }
}
