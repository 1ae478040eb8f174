use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling-window restart budget: at most `budget` automatic restarts per
/// `window`. Exhaustion means operator intervention.
#[derive(Debug)]
pub struct RestartWindow {
    times: VecDeque<Instant>,
    budget: u32,
    window: Duration,
}

impl RestartWindow {
    pub fn new(budget: u32, window: Duration) -> Self {
        Self {
            times: VecDeque::new(),
            budget,
            window,
        }
    }

    /// Try to record one restart now. Returns false when the budget is
    /// exhausted within the window.
    pub fn try_record(&mut self) -> bool {
        self.prune(Instant::now());
        if self.times.len() as u32 >= self.budget {
            return false;
        }
        self.times.push_back(Instant::now());
        true
    }

    /// Restarts currently inside the window.
    pub fn count(&mut self) -> u32 {
        self.prune(Instant::now());
        self.times.len() as u32
    }

    /// Entry count without pruning, for read-only status snapshots.
    pub fn len_unpruned(&self) -> u32 {
        self.times.len() as u32
    }

    /// Total restarts ever recorded in this window object's lifetime may
    /// exceed this; only in-window entries survive pruning.
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.times.front() {
            if now.duration_since(*front) > self.window {
                self.times.pop_front();
            } else {
                break;
            }
        }
    }

    /// Doubling backoff for the next restart attempt, capped at 30 s.
    pub fn backoff(&mut self) -> Duration {
        let n = self.count().min(5);
        Duration::from_secs((1u64 << n).min(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_bounds_restarts() {
        let mut w = RestartWindow::new(3, Duration::from_secs(60));
        assert!(w.try_record());
        assert!(w.try_record());
        assert!(w.try_record());
        assert!(!w.try_record());
        assert_eq!(w.count(), 3);
    }

    #[test]
    fn zero_budget_never_restarts() {
        let mut w = RestartWindow::new(0, Duration::from_secs(60));
        assert!(!w.try_record());
    }

    #[test]
    fn window_expiry_frees_budget() {
        let mut w = RestartWindow::new(1, Duration::from_millis(10));
        assert!(w.try_record());
        assert!(!w.try_record());
        std::thread::sleep(Duration::from_millis(20));
        assert!(w.try_record());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut w = RestartWindow::new(10, Duration::from_secs(60));
        assert_eq!(w.backoff(), Duration::from_secs(1));
        w.try_record();
        assert_eq!(w.backoff(), Duration::from_secs(2));
        w.try_record();
        assert_eq!(w.backoff(), Duration::from_secs(4));
        for _ in 0..8 {
            w.try_record();
        }
        assert!(w.backoff() <= Duration::from_secs(30));
    }
}
