//! Session hosting: accept a remote peer and hand its socket to the shell.
//!
//! The host listens on a TCP port and accepts exactly one peer at a time.
//! On accept, the shell swaps its connection streams to the socket, so the
//! ordinary command loop serves the peer; when the session ends the
//! listener stays bound and a later `host` command can accept again.

use std::io;
use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tracing::info;

/// A bound listener waiting for inbound sessions.
#[derive(Debug)]
pub struct SessionHost {
    listener: TcpListener,
}

impl SessionHost {
    /// Bind the listener. A bind failure is reported to the caller
    /// immediately; it is fatal to the command, not to the process.
    pub async fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port = listener.local_addr()?.port(), "listening for sessions");
        Ok(Self { listener })
    }

    /// The actual bound port (useful when binding port 0).
    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Wait for the next peer and return its socket halves.
    pub async fn accept(&self) -> io::Result<(OwnedReadHalf, OwnedWriteHalf, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        info!(peer = %addr, "peer connected");
        let (read_half, write_half) = stream.into_split();
        Ok((read_half, write_half, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let host = SessionHost::bind(0).await.unwrap();
        assert_ne!(host.local_port().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let first = SessionHost::bind(0).await.unwrap();
        let port = first.local_port().unwrap();

        // Second bind on the same port fails without panicking.
        let result = SessionHost::bind(port).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_accept_returns_usable_halves() {
        let host = SessionHost::bind(0).await.unwrap();
        let port = host.local_port().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let (mut read_half, mut write_half, _addr) = host.accept().await.unwrap();
        let mut buf = [0u8; 4];
        read_half.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        write_half.write_all(b"pong").await.unwrap();

        assert_eq!(client.await.unwrap(), *b"pong");
    }

    #[tokio::test]
    async fn test_accepts_again_after_peer_drops() {
        let host = SessionHost::bind(0).await.unwrap();
        let port = host.local_port().unwrap();

        // First peer connects and dies abruptly.
        let first = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (read_half, _write_half, _addr) = host.accept().await.unwrap();
        drop(first);
        drop(read_half);

        // The listener survives; a second peer gets through.
        let second = tokio::spawn(async move {
            TcpStream::connect(("127.0.0.1", port)).await.unwrap()
        });
        let accepted = host.accept().await;
        assert!(accepted.is_ok());
        second.await.unwrap();
    }
}
