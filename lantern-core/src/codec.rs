//! Attachment codec: text-safe encoding of file payloads, and block-split blobs.

use data_encoding::BASE64;
use serde::{Deserialize, Serialize};

/// Block size used when materializing a decoded payload into a [`Blob`]. Never sent on the wire.
pub const BLOCK_SIZE: usize = 512;

/// File payload in a form the transport's structured send can carry (standard padded base64).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportableFile {
    pub mime_type: String,
    pub data: String,
}

/// Encode raw bytes for transport. Lossless; inverse of [`decode_file`].
pub fn encode_file(bytes: &[u8], mime_type: &str) -> TransportableFile {
    TransportableFile {
        mime_type: mime_type.to_string(),
        data: BASE64.encode(bytes),
    }
}

/// Decode a transported payload. Rejects characters outside the alphabet, bad padding and
/// non-canonical trailing bits.
pub fn decode_file(file: &TransportableFile) -> Result<Vec<u8>, DecodeError> {
    Ok(BASE64.decode(file.data.as_bytes())?)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed attachment encoding: {0}")]
    Malformed(#[from] data_encoding::DecodeError),
}

/// Split a payload into fixed-size blocks. The last block may be short; empty input gives no blocks.
pub fn split_into_blocks(bytes: &[u8], block_size: usize) -> Vec<Vec<u8>> {
    let size = if block_size == 0 { BLOCK_SIZE } else { block_size };
    bytes.chunks(size).map(<[u8]>::to_vec).collect()
}

/// Displayable attachment: decoded bytes held as [`BLOCK_SIZE`] blocks plus a MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    mime_type: String,
    blocks: Vec<Vec<u8>>,
    len: usize,
}

impl Blob {
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            blocks: split_into_blocks(bytes, BLOCK_SIZE),
            len: bytes.len(),
        }
    }

    /// Decode a transported payload straight into a blob.
    pub fn from_file(file: &TransportableFile) -> Result<Self, DecodeError> {
        let bytes = decode_file(file)?;
        Ok(Self::from_bytes(&bytes, &file.mime_type))
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn blocks(&self) -> &[Vec<u8>] {
        &self.blocks
    }

    /// Reassemble blocks in order into one byte vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for block in &self.blocks {
            out.extend_from_slice(block);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut buf);
        buf
    }

    #[test]
    fn encodes_standard_padded_base64() {
        let file = encode_file(b"hello", "text/plain");
        assert_eq!(file.data, "aGVsbG8=");
        assert_eq!(file.mime_type, "text/plain");
    }

    #[test]
    fn roundtrip_odd_lengths() {
        for len in [0usize, 1, 2, 3, 511, 512, 513, 1025, 4097] {
            let bytes = random_bytes(len);
            let file = encode_file(&bytes, "application/octet-stream");
            assert_eq!(decode_file(&file).unwrap(), bytes, "length {len}");
        }
    }

    #[test]
    fn rejects_bad_alphabet() {
        let file = TransportableFile {
            mime_type: "text/plain".into(),
            data: "aGV$bG8=".into(),
        };
        assert!(matches!(decode_file(&file), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn rejects_truncated_padding() {
        let file = TransportableFile {
            mime_type: "text/plain".into(),
            data: "aGVsbG8".into(),
        };
        assert!(decode_file(&file).is_err());
    }

    #[test]
    fn rejects_non_canonical_trailing_bits() {
        let file = TransportableFile {
            mime_type: "text/plain".into(),
            data: "aGVsbG9=".into(),
        };
        assert!(decode_file(&file).is_err());
    }

    #[test]
    fn split_blocks() {
        let blocks = split_into_blocks(&[7u8; 1025], BLOCK_SIZE);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].len(), 512);
        assert_eq!(blocks[2].len(), 1);
        assert!(split_into_blocks(&[], BLOCK_SIZE).is_empty());
    }

    #[test]
    fn split_zero_block_size_uses_default() {
        let blocks = split_into_blocks(&[0u8; 1024], 0);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn blob_from_file_reassembles() {
        let bytes = random_bytes(1300);
        let file = encode_file(&bytes, "image/png");
        let blob = Blob::from_file(&file).unwrap();
        assert_eq!(blob.mime_type(), "image/png");
        assert_eq!(blob.len(), 1300);
        assert_eq!(blob.blocks().len(), 3);
        assert_eq!(blob.to_bytes(), bytes);
    }

    #[test]
    fn empty_blob() {
        let blob = Blob::from_bytes(&[], "text/plain");
        assert!(blob.is_empty());
        assert!(blob.blocks().is_empty());
        assert!(blob.to_bytes().is_empty());
    }
}
