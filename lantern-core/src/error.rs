//! Fault taxonomy. Every fault is absorbed by the connection manager; none is fatal to the process.

use crate::codec::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// Transport never assigned a local identity; connecting is impossible until it does.
    #[error("local identity not assigned: {0}")]
    IdentityAssignment(String),
    /// Session failed before it opened.
    #[error("session open failed: {0}")]
    SessionOpen(String),
    /// Open session failed.
    #[error("session error: {0}")]
    SessionRuntime(String),
    /// Inbound file could not be decoded; the message was dropped.
    #[error("dropped inbound file: {0}")]
    Decode(#[from] DecodeError),
    /// Intent ignored without a state change.
    #[error("ignored intent: {0}")]
    InvalidIntent(&'static str),
}

impl Fault {
    /// Faults that are only logged and never shown to the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, Fault::InvalidIntent(_))
    }
}
