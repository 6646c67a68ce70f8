//! Transfer message definitions.
//!
//! This module defines the messages exchanged in binary mode. All messages
//! are serialized using MessagePack and carried in frames (see
//! [`framing`](crate::framing)).
//!
//! A transfer is acknowledgement-free: the sender streams an [`Offer`],
//! then a pre-order sequence of entries, then [`Done`]. The receiver never
//! writes to the channel during a transfer, which preserves the
//! single-writer-per-direction invariant of the session loops.
//!
//! [`Offer`]: TransferMessage::Offer
//! [`Done`]: TransferMessage::Done

use serde::{Deserialize, Serialize};

use crate::cipher::NONCE_BASE_LENGTH;

/// Plaintext bytes carried per chunk message.
pub const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

/// What a transfer offer covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    /// A single file; exactly one `FileHeader` entry follows.
    File,
    /// A directory tree; the receiver creates the named root directory and
    /// reconstructs its contents from the entry sequence.
    Tree,
}

/// Messages exchanged in binary mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransferMessage {
    /// Opens a transfer. Always the first message after the sentinel.
    Offer {
        /// Base name of the file or root directory being sent.
        name: String,
        /// Whether a single file or a tree follows.
        kind: TransferKind,
        /// Overwrite flag from the initiating command. Without it, the
        /// receiver prompts the interactive side before replacing anything.
        overwrite: bool,
        /// Whether chunk payloads are sealed with the shared cipher.
        encrypted: bool,
        /// Per-transfer nonce base when `encrypted` is set.
        nonce_base: Option<[u8; NONCE_BASE_LENGTH]>,
    },

    /// Descend into a subdirectory of the current directory.
    EnterDir {
        /// Directory base name.
        name: String,
    },

    /// A file in the current directory; its chunks follow immediately.
    FileHeader {
        /// File base name.
        name: String,
        /// Plaintext size in bytes.
        size: u64,
        /// Unix permission bits.
        mode: u32,
    },

    /// One chunk of the current file's content. Ciphertext when the offer
    /// was encrypted, raw bytes otherwise.
    Chunk {
        /// Chunk payload.
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },

    /// Ascend out of the current subdirectory.
    LeaveDir,

    /// Transfer complete; both sides return to text mode.
    Done,

    /// Sender hit a local failure mid-transfer; both sides return to text
    /// mode and the connection stays usable.
    Abort {
        /// Human-readable reason, reported on the receiving side.
        reason: String,
    },
}

impl TransferMessage {
    /// Serialize this message to MessagePack bytes.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Deserialize a message from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: TransferMessage) {
        let bytes = message.to_msgpack().expect("serialization failed");
        let decoded = TransferMessage::from_msgpack(&bytes).expect("deserialization failed");
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_offer_roundtrip_plain() {
        roundtrip(TransferMessage::Offer {
            name: "report.txt".to_string(),
            kind: TransferKind::File,
            overwrite: false,
            encrypted: false,
            nonce_base: None,
        });
    }

    #[test]
    fn test_offer_roundtrip_encrypted_tree() {
        roundtrip(TransferMessage::Offer {
            name: "photos".to_string(),
            kind: TransferKind::Tree,
            overwrite: true,
            encrypted: true,
            nonce_base: Some([1, 2, 3, 4, 5, 6, 7, 8]),
        });
    }

    #[test]
    fn test_enter_dir_roundtrip() {
        roundtrip(TransferMessage::EnterDir {
            name: "subdir".to_string(),
        });
    }

    #[test]
    fn test_file_header_roundtrip() {
        roundtrip(TransferMessage::FileHeader {
            name: "data.bin".to_string(),
            size: u64::MAX,
            mode: 0o755,
        });
    }

    #[test]
    fn test_chunk_roundtrip() {
        let data: Vec<u8> = (0..255).collect();
        roundtrip(TransferMessage::Chunk { data });
    }

    #[test]
    fn test_chunk_roundtrip_empty() {
        roundtrip(TransferMessage::Chunk { data: Vec::new() });
    }

    #[test]
    fn test_leave_dir_and_done_roundtrip() {
        roundtrip(TransferMessage::LeaveDir);
        roundtrip(TransferMessage::Done);
    }

    #[test]
    fn test_abort_roundtrip() {
        roundtrip(TransferMessage::Abort {
            reason: "source file vanished".to_string(),
        });
    }

    #[test]
    fn test_chunk_bytes_are_compact() {
        // serde_bytes must encode chunk data as a MessagePack bin, not an
        // array of integers; the size difference matters at 64K per chunk.
        let data = vec![0u8; 1024];
        let message = TransferMessage::Chunk { data: data.clone() };
        let bytes = message.to_msgpack().unwrap();
        // bin32 header + tag/content wrapping stays well under 2x payload.
        assert!(bytes.len() < data.len() + 64);
    }

    #[test]
    fn test_message_fits_in_a_frame() {
        use crate::framing::{encode_frame, MAX_FRAME_SIZE};

        let message = TransferMessage::Chunk {
            data: vec![0xAB; TRANSFER_CHUNK_SIZE],
        };
        let bytes = message.to_msgpack().unwrap();
        assert!(bytes.len() < MAX_FRAME_SIZE);
        assert!(encode_frame(&bytes).is_ok());
    }
}
