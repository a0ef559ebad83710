//! Message log: append-only chat entries plus the attachment blobs they reference.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::Blob;

/// Persistence key for the serialized log.
pub const HISTORY_KEY: &str = "lantern-messages";
/// Persistence key for the dark-mode preference.
pub const DARK_MODE_KEY: &str = "lantern-dark-mode";

/// Handle to an attachment blob held for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(Uuid);

impl BlobId {
    pub fn new() -> Self {
        BlobId(Uuid::new_v4())
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    #[serde(rename = "you")]
    Local,
    #[serde(rename = "peer")]
    Peer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub locator: BlobId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub origin: Origin,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl ChatEntry {
    pub fn text(origin: Origin, body: impl Into<String>) -> Self {
        Self {
            origin,
            body: body.into(),
            sent_at: Utc::now(),
            attachment: None,
        }
    }

    pub fn file(origin: Origin, name: &str, mime_type: &str, locator: BlobId) -> Self {
        Self {
            origin,
            body: format!("Sent a file: {name}"),
            sent_at: Utc::now(),
            attachment: Some(Attachment {
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                locator,
            }),
        }
    }
}

/// Ordered record of the conversation. No deduplication; entries are never edited.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<ChatEntry>,
    blobs: HashMap<BlobId, Blob>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace contents with a persisted copy (startup). Restored locators have no blob behind them.
    pub fn restore(&mut self, entries: Vec<ChatEntry>) {
        self.entries = entries;
    }

    pub fn append(&mut self, entry: ChatEntry) {
        self.entries.push(entry);
    }

    /// Drop every entry and blob. Irreversible.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.blobs.clear();
    }

    pub fn all(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn register_blob(&mut self, blob: Blob) -> BlobId {
        let id = BlobId::new();
        self.blobs.insert(id, blob);
        id
    }

    pub fn blob(&self, id: &BlobId) -> Option<&Blob> {
        self.blobs.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_keeps_order_and_duplicates() {
        let mut log = MessageLog::new();
        log.append(ChatEntry::text(Origin::Local, "hi"));
        log.append(ChatEntry::text(Origin::Peer, "hi"));
        log.append(ChatEntry::text(Origin::Peer, "hi"));
        assert_eq!(log.len(), 3);
        assert_eq!(log.all()[0].origin, Origin::Local);
        assert_eq!(log.all()[2].body, "hi");
    }

    #[test]
    fn clear_drops_entries_and_blobs() {
        let mut log = MessageLog::new();
        let id = log.register_blob(Blob::from_bytes(b"x", "text/plain"));
        log.append(ChatEntry::file(Origin::Local, "x.txt", "text/plain", id));
        log.clear();
        assert!(log.is_empty());
        assert!(log.blob(&id).is_none());
    }

    #[test]
    fn file_entry_body_names_file() {
        let entry = ChatEntry::file(Origin::Peer, "a.txt", "text/plain", BlobId::new());
        assert_eq!(entry.body, "Sent a file: a.txt");
        assert_eq!(entry.attachment.unwrap().name, "a.txt");
    }

    #[test]
    fn persisted_form_roundtrips() {
        let entries = vec![
            ChatEntry::text(Origin::Local, "hello"),
            ChatEntry::file(Origin::Peer, "p.png", "image/png", BlobId::new()),
        ];
        let json = serde_json::to_string(&entries).unwrap();
        assert!(json.contains(r#""origin":"you""#));
        let back: Vec<ChatEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entries);

        let mut log = MessageLog::new();
        log.restore(back);
        assert_eq!(log.len(), 2);
        let locator = log.all()[1].attachment.as_ref().unwrap().locator;
        assert!(log.blob(&locator).is_none());
    }
}
