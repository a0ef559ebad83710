//! LANtern wire protocol: the three application message shapes.

use serde::{Deserialize, Serialize};

use crate::codec::TransportableFile;

/// All application messages. JSON objects distinguished by a `type` field; no version field,
/// both ends are assumed to speak the same revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Chat text.
    #[serde(rename = "message")]
    Text { text: String },
    /// Typing presence: true on the first keystroke, false after the debounce or on send.
    #[serde(rename = "typing")]
    Typing {
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
    /// Whole file; `file_data` is the text-safe encoded payload.
    #[serde(rename = "file")]
    File {
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "fileType")]
        file_type: String,
        #[serde(rename = "fileData")]
        file_data: String,
    },
}

impl Message {
    pub fn file(file_name: &str, payload: TransportableFile) -> Self {
        Message::File {
            file_name: file_name.to_string(),
            file_type: payload.mime_type,
            file_data: payload.data,
        }
    }

    /// Wire discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Text { .. } => "message",
            Message::Typing { .. } => "typing",
            Message::File { .. } => "file",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_shape() {
        let msg = Message::Text { text: "hi".into() };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "message", "text": "hi"})
        );
    }

    #[test]
    fn typing_shape() {
        let msg = Message::Typing { is_typing: true };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "typing", "isTyping": true})
        );
    }

    #[test]
    fn file_shape() {
        let msg = Message::file(
            "a.txt",
            TransportableFile {
                mime_type: "text/plain".into(),
                data: "aGVsbG8=".into(),
            },
        );
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "file",
                "fileName": "a.txt",
                "fileType": "text/plain",
                "fileData": "aGVsbG8="
            })
        );
    }

    #[test]
    fn parses_peer_payload() {
        let raw = r#"{"type":"typing","isTyping":false}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg, Message::Typing { is_typing: false });
        assert_eq!(msg.kind(), "typing");
    }

    #[test]
    fn unknown_type_rejected() {
        let raw = r#"{"type":"call","offer":"x"}"#;
        assert!(serde_json::from_str::<Message>(raw).is_err());
    }
}
