//! One transport channel bound to one remote identity. Never reused once ended.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::manager::Action;
use crate::protocol::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Opening,
    Open,
    Ended,
}

/// Event reported by the transport for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened,
    Data(Message),
    Closed,
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndCause {
    /// Open session closed by either side.
    Closed,
    /// Closed or errored before `Opened`.
    OpenFailed(String),
    /// Open session errored.
    Errored(String),
}

/// Effect of an accepted session event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Opened,
    Data(Message),
    Ended(EndCause),
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    remote: String,
    phase: SessionPhase,
}

impl Session {
    /// Outbound session; the host must open the channel and report `Opened` or `Errored`.
    pub fn open(remote: String) -> Self {
        Self {
            id: SessionId::new(),
            remote,
            phase: SessionPhase::Opening,
        }
    }

    /// Inbound session the transport has already opened.
    pub fn accepted(id: SessionId, remote: String) -> Self {
        Self {
            id,
            remote,
            phase: SessionPhase::Open,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        self.phase == SessionPhase::Open
    }

    /// Fire-and-forget send. Outside the open phase the message is dropped silently.
    pub fn send(&self, message: Message) -> Option<Action> {
        if !self.is_open() {
            trace!(session = %self.id, kind = message.kind(), "dropping send on session that is not open");
            return None;
        }
        Some(Action::Send {
            session: self.id,
            message,
        })
    }

    /// Apply a transport event. Returns `None` for events that are not valid in the current
    /// phase, including anything after the session has ended.
    pub fn apply(&mut self, event: SessionEvent) -> Option<SessionSignal> {
        match (self.phase, event) {
            (SessionPhase::Ended, _) => None,
            (SessionPhase::Opening, SessionEvent::Opened) => {
                self.phase = SessionPhase::Open;
                Some(SessionSignal::Opened)
            }
            (SessionPhase::Opening, SessionEvent::Errored(cause)) => {
                self.phase = SessionPhase::Ended;
                Some(SessionSignal::Ended(EndCause::OpenFailed(cause)))
            }
            (SessionPhase::Opening, SessionEvent::Closed) => {
                self.phase = SessionPhase::Ended;
                Some(SessionSignal::Ended(EndCause::OpenFailed(
                    "closed before open".to_string(),
                )))
            }
            (SessionPhase::Opening, SessionEvent::Data(_)) => None,
            (SessionPhase::Open, SessionEvent::Opened) => None,
            (SessionPhase::Open, SessionEvent::Data(message)) => Some(SessionSignal::Data(message)),
            (SessionPhase::Open, SessionEvent::Closed) => {
                self.phase = SessionPhase::Ended;
                Some(SessionSignal::Ended(EndCause::Closed))
            }
            (SessionPhase::Open, SessionEvent::Errored(cause)) => {
                self.phase = SessionPhase::Ended;
                Some(SessionSignal::Ended(EndCause::Errored(cause)))
            }
        }
    }

    /// Locally close. Returns the close action unless the session already ended.
    pub fn close(&mut self) -> Option<Action> {
        if self.phase == SessionPhase::Ended {
            return None;
        }
        self.phase = SessionPhase::Ended;
        Some(Action::CloseSession(self.id))
    }
}
