//! Sentinel-based mode switching and the binary frame codec.
//!
//! A ferrysh connection carries newline-terminated UTF-8 command text by
//! default. A binary transfer is announced by the *sentinel*: a reserved
//! line that switches the receiver into binary mode for the duration of one
//! transfer. In binary mode the stream is a sequence of frames:
//!
//! - 4 bytes: magic bytes "FXFR"
//! - 4 bytes: payload length (big-endian)
//! - N bytes: payload (a MessagePack-encoded [`TransferMessage`])
//!
//! The sentinel contains ASCII control bytes so no legitimate command line
//! can consist of it, and it only counts when it is the *entire* line: a
//! command that merely contains the sentinel text stays ordinary text.
//!
//! [`TransferMessage`]: crate::messages::TransferMessage

use crate::error::{ProtocolError, Result};

/// The reserved line that switches a connection from text to binary mode.
///
/// Framed by STX/ETX control bytes, which line-oriented command input never
/// produces as a complete line.
pub const TRANSFER_SENTINEL: &str = "\u{0002}FERRY-XFER\u{0003}";

/// Magic bytes identifying a ferrysh transfer frame.
pub const FRAME_MAGIC: [u8; 4] = *b"FXFR";

/// Frame header size: 4 (magic) + 4 (length) = 8 bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum frame size (1 MB). Transfer chunks are far smaller; anything
/// beyond this is a corrupt or hostile stream.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Returns true if a received line is the transfer mode switch.
///
/// Trailing `\r\n` / `\n` from line-oriented reads is ignored; everything
/// else must match the sentinel exactly.
pub fn is_mode_switch(line: &str) -> bool {
    line.trim_end_matches(['\r', '\n']) == TRANSFER_SENTINEL
}

/// Which of the two stream modes a connection is currently in.
///
/// The transition is an explicit function of received lines rather than
/// implicit stream-reading behavior, so it can be tested on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    /// Newline-terminated UTF-8 command text.
    #[default]
    Line,
    /// Length-prefixed transfer frames.
    Binary,
}

impl ChannelMode {
    /// Advance the mode for a received text line.
    ///
    /// In line mode, the sentinel switches to binary; any other line leaves
    /// the mode unchanged. Lines are not read in binary mode, so the mode
    /// is unchanged there as well.
    pub fn on_line(self, line: &str) -> Self {
        match self {
            ChannelMode::Line if is_mode_switch(line) => ChannelMode::Binary,
            mode => mode,
        }
    }

    /// Return to line mode once a transfer has completed.
    pub fn on_transfer_complete(self) -> Self {
        ChannelMode::Line
    }
}

/// Encode a frame payload into bytes ready for the wire.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE - FRAME_HEADER_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len() + FRAME_HEADER_SIZE,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut output = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    output.extend_from_slice(&FRAME_MAGIC);
    output.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    output.extend_from_slice(payload);
    Ok(output)
}

/// Validate a frame header and return the payload length it announces.
pub fn decode_frame_header(header: &[u8; FRAME_HEADER_SIZE]) -> Result<usize> {
    let magic = &header[0..4];
    if magic != FRAME_MAGIC {
        return Err(ProtocolError::InvalidFrameMagic {
            expected: u32::from_be_bytes(FRAME_MAGIC),
            got: u32::from_be_bytes([magic[0], magic[1], magic[2], magic[3]]),
        });
    }

    let length_bytes: [u8; 4] = header[4..8].try_into().expect("header slice is 4 bytes");
    let payload_len = u32::from_be_bytes(length_bytes) as usize;

    if FRAME_HEADER_SIZE + payload_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: FRAME_HEADER_SIZE + payload_len,
            max: MAX_FRAME_SIZE,
        });
    }

    Ok(payload_len)
}

/// Decode one frame from a buffer.
///
/// Returns the payload and the number of bytes consumed.
pub fn decode_frame(data: &[u8]) -> Result<(Vec<u8>, usize)> {
    match try_decode_frame(data)? {
        Some(decoded) => Ok(decoded),
        None => Err(ProtocolError::Deserialization(format!(
            "insufficient data for frame: have {} bytes",
            data.len()
        ))),
    }
}

/// Try to decode one frame, returning `None` if the buffer holds only a
/// partial frame. Useful for streaming reads.
pub fn try_decode_frame(data: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
    if data.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let header: [u8; FRAME_HEADER_SIZE] = data[..FRAME_HEADER_SIZE]
        .try_into()
        .expect("slice length checked");
    let payload_len = decode_frame_header(&header)?;

    let total = FRAME_HEADER_SIZE + payload_len;
    if data.len() < total {
        return Ok(None);
    }

    Ok(Some((data[FRAME_HEADER_SIZE..total].to_vec(), total)))
}
