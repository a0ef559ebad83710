//! LANtern peer chat reference implementation.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod codec;
pub mod error;
pub mod history;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod timer;
pub mod typing;
pub mod wire;

pub use codec::{decode_file, encode_file, Blob, DecodeError, TransportableFile};
pub use error::Fault;
pub use history::{BlobId, ChatEntry, MessageLog, Origin, DARK_MODE_KEY, HISTORY_KEY};
pub use manager::{
    Action, ConnectionManager, ConnectionState, Event, ManagerConfig, Snapshot,
    MAX_RECONNECT_ATTEMPTS,
};
pub use protocol::Message;
pub use session::{SessionEvent, SessionId};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
