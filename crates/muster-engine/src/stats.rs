use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Liveness counters shared between an engine loop and the supervisor's
/// health probes. All loads/stores are relaxed; these are monitoring
/// signals, not synchronization.
#[derive(Debug, Default)]
pub struct EngineStats {
    subscribed: AtomicBool,
    events_seen: AtomicU64,
    replies_sent: AtomicU64,
    turns_aborted: AtomicU64,
    last_event_unix: AtomicI64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_subscribed(&self) {
        self.subscribed.store(true, Ordering::Relaxed);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Relaxed)
    }

    pub fn mark_event(&self) {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
        self.last_event_unix
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn mark_reply(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_aborted_turn(&self) {
        self.turns_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_seen(&self) -> u64 {
        self.events_seen.load(Ordering::Relaxed)
    }

    pub fn replies_sent(&self) -> u64 {
        self.replies_sent.load(Ordering::Relaxed)
    }

    pub fn turns_aborted(&self) -> u64 {
        self.turns_aborted.load(Ordering::Relaxed)
    }

    /// Seconds since the last inbound event, or `None` before the first.
    pub fn idle_secs(&self) -> Option<u64> {
        let last = self.last_event_unix.load(Ordering::Relaxed);
        if last == 0 {
            return None;
        }
        Some((chrono::Utc::now().timestamp() - last).max(0) as u64)
    }
}
