//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize a message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a message.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Cryptographic errors
    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption operation failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The peer offered an encrypted transfer but no cipher key is set.
    #[error("encrypted transfer offered but no cipher key is configured")]
    CipherRequired,

    // Frame errors
    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Frame has invalid magic bytes.
    #[error("invalid frame magic: expected {expected:#010x}, got {got:#010x}")]
    InvalidFrameMagic {
        /// Expected magic value.
        expected: u32,
        /// Actual magic value received.
        got: u32,
    },

    // Connection errors
    /// Connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Operation timed out.
    #[error("operation timed out: {0}")]
    Timeout(String),

    // Transfer errors
    /// File or directory transfer failed.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// The peer violated the transfer protocol (unexpected message or state).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl ProtocolError {
    /// Whether this error means the underlying connection is gone.
    ///
    /// Transfer-local failures leave the connection usable; connection-loss
    /// errors end the session.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionClosed(_) | ProtocolError::Timeout(_)
        )
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ProtocolError::Deserialization(err.to_string())
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => ProtocolError::Timeout(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed(err.to_string()),
            _ => ProtocolError::TransferFailed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_error_display() {
        let err = ProtocolError::Serialization("invalid utf-8".to_string());
        assert_eq!(err.to_string(), "serialization failed: invalid utf-8");
    }

    #[test]
    fn test_encryption_error_display() {
        let err = ProtocolError::Encryption("chunk counter exhausted".to_string());
        assert_eq!(err.to_string(), "encryption failed: chunk counter exhausted");
    }

    #[test]
    fn test_decryption_error_display() {
        let err = ProtocolError::Decryption("authentication tag mismatch".to_string());
        assert_eq!(
            err.to_string(),
            "decryption failed: authentication tag mismatch"
        );
    }

    #[test]
    fn test_cipher_required_display() {
        let err = ProtocolError::CipherRequired;
        assert_eq!(
            err.to_string(),
            "encrypted transfer offered but no cipher key is configured"
        );
    }

    #[test]
    fn test_frame_too_large_error_display() {
        let err = ProtocolError::FrameTooLarge {
            size: 100_000,
            max: 65536,
        };
        assert_eq!(
            err.to_string(),
            "frame too large: 100000 bytes exceeds maximum of 65536 bytes"
        );
    }

    #[test]
    fn test_invalid_frame_magic_error_display() {
        let err = ProtocolError::InvalidFrameMagic {
            expected: 0x46584652,
            got: 0xDEADBEEF,
        };
        assert!(err.to_string().contains("0x46584652"));
        assert!(err.to_string().contains("0xdeadbeef"));
    }

    #[test]
    fn test_connection_closed_error_display() {
        let err = ProtocolError::ConnectionClosed("peer disconnected".to_string());
        assert_eq!(err.to_string(), "connection closed: peer disconnected");
    }

    #[test]
    fn test_transfer_failed_error_display() {
        let err = ProtocolError::TransferFailed("destination rejected".to_string());
        assert_eq!(err.to_string(), "transfer failed: destination rejected");
    }

    #[test]
    fn test_protocol_violation_display() {
        let err = ProtocolError::ProtocolViolation("chunk before header".to_string());
        assert_eq!(err.to_string(), "protocol violation: chunk before header");
    }

    #[test]
    fn test_from_rmp_serde_decode_error() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct TestStruct {
            field: String,
        }
        let msgpack_err = rmp_serde::from_slice::<TestStruct>(&[0x00]).unwrap_err();
        let protocol_err: ProtocolError = msgpack_err.into();
        assert!(matches!(protocol_err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_from_io_error_timeout() {
        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let protocol_err: ProtocolError = io_err.into();
        assert!(matches!(protocol_err, ProtocolError::Timeout(_)));
    }

    #[test]
    fn test_from_io_error_connection_closed() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let protocol_err: ProtocolError = io_err.into();
        assert!(matches!(protocol_err, ProtocolError::ConnectionClosed(_)));
    }

    #[test]
    fn test_from_io_error_eof_is_connection_loss() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let protocol_err: ProtocolError = io_err.into();
        assert!(protocol_err.is_connection_loss());
    }

    #[test]
    fn test_from_io_error_other() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let protocol_err: ProtocolError = io_err.into();
        assert!(matches!(protocol_err, ProtocolError::TransferFailed(_)));
        assert!(!protocol_err.is_connection_loss());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
