//! Per-identity Discord gateway connection: WebSocket for receiving, with
//! heartbeats, IDENTIFY, and reconnect under exponential backoff + jitter.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use muster_core::{AttachmentInfo, ConnectionState, InboundEvent};

use crate::identity::BotIdentity;

/// Discord Gateway opcodes.
const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT | DIRECT_MESSAGES.
const INTENTS: u64 = 33281;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const BACKOFF_CAP_SECS: u64 = 60;

/// Connection task for one bot identity. Runs until shutdown is requested;
/// reconnects on any disconnect with doubling, jittered backoff.
pub async fn run(identity: Arc<BotIdentity>) {
    let mut shutdown_rx = identity.shutdown_receiver();
    let mut backoff_secs = 1u64;

    identity.set_state(ConnectionState::Connecting);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        info!(bot = %identity.name(), "connecting to Discord gateway");
        identity.set_state(ConnectionState::Connecting);

        let ws_stream = match tokio_tungstenite::connect_async(GATEWAY_URL).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!(bot = %identity.name(), error = %e, "gateway connection failed");
                identity.set_state(ConnectionState::Degraded);
                sleep_backoff(&mut backoff_secs).await;
                continue;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        // Wait for HELLO to learn the heartbeat interval.
        let heartbeat_ms = match read.next().await {
            Some(Ok(msg)) => {
                let text = msg.to_text().unwrap_or("{}");
                let payload: Value = serde_json::from_str(text).unwrap_or_default();
                if payload["op"].as_u64() == Some(OP_HELLO) {
                    payload["d"]["heartbeat_interval"].as_u64().unwrap_or(41250)
                } else {
                    warn!(bot = %identity.name(), "expected HELLO, got op={}", payload["op"]);
                    41250
                }
            }
            _ => {
                error!(bot = %identity.name(), "no HELLO received");
                identity.set_state(ConnectionState::Degraded);
                sleep_backoff(&mut backoff_secs).await;
                continue;
            }
        };

        let identify = json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": identity.token(),
                "intents": INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "muster",
                    "device": "muster"
                }
            }
        });
        if let Err(e) = write
            .send(tokio_tungstenite::tungstenite::Message::Text(
                identify.to_string().into(),
            ))
            .await
        {
            error!(bot = %identity.name(), error = %e, "failed to send IDENTIFY");
            identity.set_state(ConnectionState::Degraded);
            sleep_backoff(&mut backoff_secs).await;
            continue;
        }

        backoff_secs = 1;
        info!(bot = %identity.name(), heartbeat_ms, "gateway connected");

        let mut sequence: Option<u64> = None;
        let mut heartbeat_timer =
            tokio::time::interval(std::time::Duration::from_millis(heartbeat_ms));
        heartbeat_timer.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(bot = %identity.name(), "shutdown requested");
                        let _ = write.close().await;
                        identity.set_state(ConnectionState::Closed);
                        return;
                    }
                }
                _ = heartbeat_timer.tick() => {
                    let hb = json!({ "op": OP_HEARTBEAT, "d": sequence });
                    if let Err(e) = write.send(
                        tokio_tungstenite::tungstenite::Message::Text(hb.to_string().into())
                    ).await {
                        warn!(bot = %identity.name(), error = %e, "heartbeat send failed");
                        break;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(ws_msg)) => {
                            if ws_msg.is_close() {
                                info!(bot = %identity.name(), "server closed connection");
                                break;
                            }
                            let text = match ws_msg.to_text() {
                                Ok(t) => t,
                                Err(_) => continue,
                            };
                            let payload: Value = match serde_json::from_str(text) {
                                Ok(v) => v,
                                Err(_) => continue,
                            };

                            if let Some(s) = payload["s"].as_u64() {
                                sequence = Some(s);
                            }

                            match payload["op"].as_u64().unwrap_or(u64::MAX) {
                                OP_DISPATCH => {
                                    let event_name = payload["t"].as_str().unwrap_or("");
                                    handle_dispatch(&identity, event_name, &payload["d"]);
                                }
                                OP_HEARTBEAT_ACK => {
                                    debug!(bot = %identity.name(), "heartbeat ACK");
                                }
                                OP_HEARTBEAT => {
                                    let hb = json!({ "op": OP_HEARTBEAT, "d": sequence });
                                    let _ = write.send(
                                        tokio_tungstenite::tungstenite::Message::Text(hb.to_string().into())
                                    ).await;
                                }
                                op => {
                                    debug!(bot = %identity.name(), op, "unhandled opcode");
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!(bot = %identity.name(), error = %e, "websocket error");
                            break;
                        }
                        None => {
                            info!(bot = %identity.name(), "websocket stream ended");
                            break;
                        }
                    }
                }
            }
        }

        identity.set_state(ConnectionState::Degraded);
        if *shutdown_rx.borrow() {
            break;
        }
        sleep_backoff(&mut backoff_secs).await;
    }

    identity.set_state(ConnectionState::Closed);
}

/// Doubling backoff capped at 60 s, with ±50% jitter so a fleet of
/// identities does not reconnect in lockstep.
async fn sleep_backoff(backoff_secs: &mut u64) {
    let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
    let delay = (*backoff_secs as f64 * jitter).max(0.5);
    debug!(delay_secs = delay, "reconnect backoff");
    tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
    *backoff_secs = (*backoff_secs * 2).min(BACKOFF_CAP_SECS);
}

/// Handle one DISPATCH (op 0) payload.
fn handle_dispatch(identity: &Arc<BotIdentity>, event_name: &str, data: &Value) {
    match event_name {
        "READY" => {
            let user_id = data["user"]["id"].as_str().unwrap_or("");
            let username = data["user"]["username"].as_str().unwrap_or("");
            identity.set_user(user_id, username);
            identity.set_state(ConnectionState::Ready);
            info!(bot = %identity.name(), user_id, "bot ready");
        }
        "THREAD_CREATE" => {
            if let (Some(thread_id), Some(parent_id)) =
                (data["id"].as_str(), data["parent_id"].as_str())
            {
                identity.record_thread(thread_id, parent_id);
                debug!(bot = %identity.name(), thread_id, parent_id, "thread recorded");
            }
        }
        "MESSAGE_CREATE" => {
            if let Some(event) = parse_message_create(identity, data) {
                identity.deliver(event);
            }
        }
        _ => {
            debug!(bot = %identity.name(), event = event_name, "unhandled dispatch");
        }
    }
}

/// Convert a MESSAGE_CREATE payload into an [`InboundEvent`].
///
/// Messages posted inside a known thread arrive with the thread as their
/// channel; the event then carries the parent as `channel_id` and the
/// thread as `thread_id`.
fn parse_message_create(identity: &Arc<BotIdentity>, data: &Value) -> Option<InboundEvent> {
    let message_id = data["id"].as_str()?.to_string();
    let raw_channel = data["channel_id"].as_str()?.to_string();
    let author_id = data["author"]["id"].as_str().unwrap_or("").to_string();
    let author_name = data["author"]["username"].as_str().unwrap_or("unknown").to_string();
    let is_bot_author = data["author"]["bot"].as_bool().unwrap_or(false);
    let content = data["content"].as_str().unwrap_or("").to_string();

    let (channel_id, thread_id) = match identity.thread_parent(&raw_channel) {
        Some(parent) => (parent, Some(raw_channel)),
        None => (raw_channel, None),
    };

    let timestamp = data["timestamp"]
        .as_str()
        .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(InboundEvent {
        bot: identity.name().to_string(),
        channel_id,
        thread_id,
        message_id,
        author_id,
        author_name,
        is_bot_author,
        content,
        attachments: parse_attachments(data),
        timestamp,
    })
}

/// Extract attachment descriptors from a MESSAGE_CREATE payload.
pub(crate) fn parse_attachments(data: &Value) -> Vec<AttachmentInfo> {
    let mut result = Vec::new();
    if let Some(attachments) = data["attachments"].as_array() {
        for att in attachments {
            let url = att["url"].as_str().unwrap_or("").to_string();
            if url.is_empty() {
                continue;
            }
            result.push(AttachmentInfo {
                filename: att["filename"].as_str().unwrap_or("file").to_string(),
                url,
                size: att["size"].as_u64().unwrap_or(0),
                content_type: att["content_type"].as_str().map(|s| s.to_string()),
            });
        }
    }
    result
}
