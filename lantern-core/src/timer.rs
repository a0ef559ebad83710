//! Named, cancellable tick deadlines. At most one pending timer per kind.

use std::collections::BTreeMap;

/// Timer purpose. Ordering decides firing order when several are due on the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Auto-send `Typing{false}` after the last keystroke.
    TypingStop,
    /// Automatic reconnection attempt.
    Retry,
}

#[derive(Debug, Default)]
pub struct Timers {
    pending: BTreeMap<TimerKind, u64>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire `delay` ticks after `now`, replacing any pending timer of that kind.
    pub fn arm(&mut self, kind: TimerKind, now: u64, delay: u64) {
        self.pending.insert(kind, now.saturating_add(delay));
    }

    /// Cancel `kind`. Returns whether one was pending.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.pending.remove(&kind).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.pending.contains_key(&kind)
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<u64> {
        self.pending.get(&kind).copied()
    }

    /// Remove and return every timer whose deadline is at or before `now`, in [`TimerKind`] order.
    pub fn take_due(&mut self, now: u64) -> Vec<TimerKind> {
        let due: Vec<TimerKind> = self
            .pending
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(&kind, _)| kind)
            .collect();
        for kind in &due {
            self.pending.remove(kind);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_at_deadline_once() {
        let mut timers = Timers::new();
        timers.arm(TimerKind::Retry, 10, 5);
        assert!(timers.take_due(14).is_empty());
        assert_eq!(timers.take_due(15), vec![TimerKind::Retry]);
        assert!(timers.take_due(16).is_empty());
        assert!(!timers.is_pending(TimerKind::Retry));
    }

    #[test]
    fn rearm_replaces_pending() {
        let mut timers = Timers::new();
        timers.arm(TimerKind::TypingStop, 0, 2);
        timers.arm(TimerKind::TypingStop, 1, 2);
        assert_eq!(timers.deadline(TimerKind::TypingStop), Some(3));
        assert!(timers.take_due(2).is_empty());
        assert_eq!(timers.take_due(3), vec![TimerKind::TypingStop]);
    }

    #[test]
    fn cancel_is_per_kind() {
        let mut timers = Timers::new();
        timers.arm(TimerKind::TypingStop, 0, 2);
        timers.arm(TimerKind::Retry, 0, 5);
        assert!(timers.cancel(TimerKind::Retry));
        assert!(!timers.cancel(TimerKind::Retry));
        assert!(timers.is_pending(TimerKind::TypingStop));
        timers.cancel_all();
        assert!(timers.take_due(u64::MAX).is_empty());
    }

    #[test]
    fn due_together_in_kind_order() {
        let mut timers = Timers::new();
        timers.arm(TimerKind::Retry, 0, 2);
        timers.arm(TimerKind::TypingStop, 0, 2);
        assert_eq!(
            timers.take_due(2),
            vec![TimerKind::TypingStop, TimerKind::Retry]
        );
    }
}
