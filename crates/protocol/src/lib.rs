//! # Ferrysh Protocol Library
//!
//! This crate provides the wire-level protocol for the ferrysh remote
//! file-management shell.
//!
//! ## Overview
//!
//! A ferrysh connection is one duplex byte stream carrying two modes:
//!
//! - **Line mode**: newline-terminated UTF-8 command text, the default.
//! - **Binary mode**: entered when an entire received line equals the
//!   reserved sentinel; carries length-prefixed frames of MessagePack
//!   transfer messages until the transfer completes, then drops back to
//!   line mode.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Transfer Messages              │  MessagePack-encoded
//! ├─────────────────────────────────────────┤
//! │        Payload Cipher (optional)        │  AES-256-GCM, pre-shared key
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  "FXFR" magic, length-prefixed
//! ├─────────────────────────────────────────┤
//! │    Line-oriented text + sentinel        │
//! ├─────────────────────────────────────────┤
//! │            Transport (TCP)              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{encode_frame, decode_frame, TransferMessage, TransferKind};
//!
//! // Announce a single-file transfer
//! let offer = TransferMessage::Offer {
//!     name: "report.txt".to_string(),
//!     kind: TransferKind::File,
//!     overwrite: false,
//!     encrypted: false,
//!     nonce_base: None,
//! };
//!
//! // Serialize and frame it for the wire
//! let bytes = offer.to_msgpack().unwrap();
//! let frame = encode_frame(&bytes).unwrap();
//!
//! // The receiver reverses both layers
//! let (payload, _consumed) = decode_frame(&frame).unwrap();
//! assert_eq!(TransferMessage::from_msgpack(&payload).unwrap(), offer);
//! ```
//!
//! ## Modules
//!
//! - [`framing`]: sentinel detection, channel modes, and the frame codec
//! - [`messages`]: transfer message definitions
//! - [`cipher`]: pre-shared-key payload encryption
//! - [`error`]: error types

pub mod cipher;
pub mod error;
pub mod framing;
pub mod messages;

pub use cipher::{
    CipherLayer, TransferCipher, KEY_LENGTH, NONCE_BASE_LENGTH, NONCE_LENGTH, TAG_OVERHEAD,
};
pub use error::{ProtocolError, Result};
pub use framing::{
    decode_frame, decode_frame_header, encode_frame, is_mode_switch, try_decode_frame,
    ChannelMode, FRAME_HEADER_SIZE, FRAME_MAGIC, MAX_FRAME_SIZE, TRANSFER_SENTINEL,
};
pub use messages::{TransferKind, TransferMessage, TRANSFER_CHUNK_SIZE};
