use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::debug;

use muster_core::{ConnectionState, InboundEvent};

/// One Discord bot credential and its live connection state.
///
/// The identity owns the fan-out channel for its inbound events: every
/// subscriber gets an independent, ordered, bounded view of the stream.
pub struct BotIdentity {
    name: String,
    token: String,
    user_id: RwLock<Option<String>>,
    display_name: RwLock<Option<String>>,
    state: RwLock<ConnectionState>,
    events: broadcast::Sender<InboundEvent>,
    /// Events lost to lagging subscribers, monotonic.
    dropped_events: AtomicU64,
    /// thread id → parent channel id, learned from THREAD_CREATE dispatches.
    threads: Mutex<HashMap<String, String>>,
    shutdown: watch::Sender<bool>,
}

impl BotIdentity {
    pub fn new(name: &str, token: &str, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            name: name.to_string(),
            token: token.to_string(),
            user_id: RwLock::new(None),
            display_name: RwLock::new(None),
            state: RwLock::new(ConnectionState::Initializing),
            events,
            dropped_events: AtomicU64::new(0),
            threads: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    pub fn set_user(&self, user_id: &str, display_name: &str) {
        *self.user_id.write() = Some(user_id.to_string());
        *self.display_name.write() = Some(display_name.to_string());
    }

    /// Record a thread and its parent channel.
    pub fn record_thread(&self, thread_id: &str, parent_id: &str) {
        self.threads
            .lock()
            .insert(thread_id.to_string(), parent_id.to_string());
    }

    /// Parent channel of a known thread.
    pub fn thread_parent(&self, channel_id: &str) -> Option<String> {
        self.threads.lock().get(channel_id).cloned()
    }

    /// Fan an event out to every live subscriber. Send errors only mean
    /// nobody is subscribed, which is fine.
    pub fn deliver(&self, event: InboundEvent) {
        let receivers = self.events.receiver_count();
        if self.events.send(event).is_err() {
            debug!(bot = %self.name, "event dropped: no subscribers");
        } else {
            debug!(bot = %self.name, receivers, "event fanned out");
        }
    }

    /// A fresh, independent view of this identity's event stream.
    pub fn subscribe(self: &std::sync::Arc<Self>) -> EventStream {
        EventStream {
            rx: self.events.subscribe(),
            identity: std::sync::Arc::clone(self),
        }
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub(crate) fn count_dropped(&self, n: u64) {
        self.dropped_events.fetch_add(n, Ordering::Relaxed);
    }

    pub fn summary(&self) -> BotSummary {
        BotSummary {
            id: self.name.clone(),
            user_id: self.user_id.read().clone(),
            display_name: self.display_name.read().clone(),
            state: self.state(),
            dropped_events: self.dropped_events(),
        }
    }
}

/// Public view of one identity, served by `/bots` and `/health`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BotSummary {
    pub id: String,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub state: ConnectionState,
    pub dropped_events: u64,
}

/// One subscriber's ordered view of an identity's inbound events.
///
/// When the subscriber falls more than the buffer behind, the oldest events
/// are discarded: `next()` silently skips the gap, counts the loss on the
/// identity, and keeps going. The stream ends only when the identity is
/// dropped.
pub struct EventStream {
    rx: broadcast::Receiver<InboundEvent>,
    identity: std::sync::Arc<BotIdentity>,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<InboundEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.identity.count_dropped(n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll used by tests and drain paths.
    pub fn try_next(&mut self) -> Option<InboundEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.identity.count_dropped(n);
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    pub fn bot(&self) -> &str {
        self.identity.name()
    }
}
