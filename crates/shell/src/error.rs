//! Error types for the shell crate.

use std::path::PathBuf;

use protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by shell commands and session handling.
#[derive(Debug, Error)]
pub enum ShellError {
    /// A session command was issued with no active connection.
    #[error("no active session")]
    NoSession,

    /// A connection-establishing command was issued during a session.
    #[error("a session is already active")]
    AlreadyConnected,

    /// Lookup of a download mark that was never assigned (or was cleared).
    #[error("no marked entry with id {0}")]
    UnknownMark(u32),

    /// A referenced path does not exist.
    #[error("path not found: {0}")]
    NotFound(PathBuf),

    /// A directory was expected.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Wire-protocol failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// I/O failure outside the wire protocol.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShellError {
    /// Whether this error means the remote connection is gone.
    ///
    /// Connection loss ends the session; every other error leaves it
    /// usable and is reported as a single line.
    pub fn is_connection_loss(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            ShellError::Protocol(e) => e.is_connection_loss(),
            ShellError::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Result type alias for shell operations.
pub type Result<T> = std::result::Result<T, ShellError>;
