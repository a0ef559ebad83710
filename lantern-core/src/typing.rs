//! Typing presence: local edge tracking and the remote flag.

use crate::protocol::Message;

#[derive(Debug, Default)]
pub struct TypingSignal {
    /// Whether we have told the peer we are typing.
    local: bool,
    /// Last value the peer sent, stored verbatim.
    remote: bool,
}

impl TypingSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a keystroke. Returns `Typing{true}` only on the idle -> typing edge.
    pub fn keystroke(&mut self) -> Option<Message> {
        if self.local {
            return None;
        }
        self.local = true;
        Some(Message::Typing { is_typing: true })
    }

    /// Stop signaling. Returns `Typing{false}` if we were signaling.
    pub fn stop(&mut self) -> Option<Message> {
        if !self.local {
            return None;
        }
        self.local = false;
        Some(Message::Typing { is_typing: false })
    }

    pub fn is_signaling(&self) -> bool {
        self.local
    }

    /// Forget local state without producing a message (session is gone).
    pub fn reset_local(&mut self) {
        self.local = false;
    }

    pub fn set_remote(&mut self, active: bool) {
        self.remote = active;
    }

    pub fn clear_remote(&mut self) {
        self.remote = false;
    }

    pub fn peer_typing(&self) -> bool {
        self.remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_keystroke_signals() {
        let mut t = TypingSignal::new();
        assert_eq!(t.keystroke(), Some(Message::Typing { is_typing: true }));
        assert_eq!(t.keystroke(), None);
        assert!(t.is_signaling());
        assert_eq!(t.stop(), Some(Message::Typing { is_typing: false }));
        assert_eq!(t.stop(), None);
        assert_eq!(t.keystroke(), Some(Message::Typing { is_typing: true }));
    }

    #[test]
    fn remote_is_verbatim() {
        let mut t = TypingSignal::new();
        t.set_remote(true);
        t.set_remote(true);
        assert!(t.peer_typing());
        t.set_remote(false);
        assert!(!t.peer_typing());
        t.set_remote(true);
        t.clear_remote();
        assert!(!t.peer_typing());
    }

    #[test]
    fn reset_local_is_silent() {
        let mut t = TypingSignal::new();
        t.keystroke();
        t.reset_local();
        assert_eq!(t.stop(), None);
    }
}
