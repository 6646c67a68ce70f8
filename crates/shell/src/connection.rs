//! The active connection: swappable stream endpoints, cipher, and marks.
//!
//! A shell process owns exactly one [`Connection`]. It starts on the
//! console endpoints; hosting a session swaps in the accepted socket's
//! halves and disconnecting restores the console. All shell I/O goes
//! through the connection's *current* endpoints, never a captured
//! reference, so a mid-session swap is transparent to command handling.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use protocol::CipherLayer;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf, Stdin, Stdout,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::Result;
use crate::marks::MarkRegistry;

/// The readable side of the active duplex channel.
pub enum InputEndpoint {
    /// The local console (stdin).
    Console(BufReader<Stdin>),
    /// The read half of a peer socket.
    Socket(BufReader<OwnedReadHalf>),
}

impl InputEndpoint {
    /// A fresh console endpoint.
    pub fn console() -> Self {
        Self::Console(BufReader::new(tokio::io::stdin()))
    }

    /// Wrap the read half of an accepted or dialed socket.
    pub fn socket(half: OwnedReadHalf) -> Self {
        Self::Socket(BufReader::new(half))
    }

    /// Read one line, without its trailing newline.
    ///
    /// Returns `None` on end of stream (peer disconnect, or console EOF).
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let bytes_read = match self {
            InputEndpoint::Console(reader) => reader.read_line(&mut line).await?,
            InputEndpoint::Socket(reader) => reader.read_line(&mut line).await?,
        };

        if bytes_read == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }
}

impl AsyncRead for InputEndpoint {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            InputEndpoint::Console(reader) => Pin::new(reader).poll_read(cx, buf),
            InputEndpoint::Socket(reader) => Pin::new(reader).poll_read(cx, buf),
        }
    }
}

impl std::fmt::Debug for InputEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputEndpoint::Console(_) => write!(f, "InputEndpoint::Console"),
            InputEndpoint::Socket(_) => write!(f, "InputEndpoint::Socket"),
        }
    }
}

/// The writable side of the active duplex channel.
pub enum OutputEndpoint {
    /// The local console (stdout).
    Console(Stdout),
    /// The write half of a peer socket.
    Socket(OwnedWriteHalf),
}

impl OutputEndpoint {
    /// A fresh console endpoint.
    pub fn console() -> Self {
        Self::Console(tokio::io::stdout())
    }

    /// Wrap the write half of an accepted or dialed socket.
    pub fn socket(half: OwnedWriteHalf) -> Self {
        Self::Socket(half)
    }

    /// Write a string followed by a newline, then flush.
    pub async fn write_line(&mut self, text: &str) -> io::Result<()> {
        self.write_str(text).await?;
        self.write_str("\n").await
    }

    /// Write a string without a newline (prompts), then flush.
    pub async fn write_str(&mut self, text: &str) -> io::Result<()> {
        match self {
            OutputEndpoint::Console(writer) => {
                writer.write_all(text.as_bytes()).await?;
                writer.flush().await
            }
            OutputEndpoint::Socket(writer) => {
                writer.write_all(text.as_bytes()).await?;
                writer.flush().await
            }
        }
    }
}

impl AsyncWrite for OutputEndpoint {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            OutputEndpoint::Console(writer) => Pin::new(writer).poll_write(cx, buf),
            OutputEndpoint::Socket(writer) => Pin::new(writer).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            OutputEndpoint::Console(writer) => Pin::new(writer).poll_flush(cx),
            OutputEndpoint::Socket(writer) => Pin::new(writer).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            OutputEndpoint::Console(writer) => Pin::new(writer).poll_shutdown(cx),
            OutputEndpoint::Socket(writer) => Pin::new(writer).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for OutputEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputEndpoint::Console(_) => write!(f, "OutputEndpoint::Console"),
            OutputEndpoint::Socket(_) => write!(f, "OutputEndpoint::Socket"),
        }
    }
}

/// The live duplex channel plus its download marks and cipher.
///
/// `connected` is true iff the endpoints currently reference a peer socket
/// rather than the console.
pub struct Connection {
    input: InputEndpoint,
    output: OutputEndpoint,
    cipher: CipherLayer,
    marks: MarkRegistry,
    connected: bool,
}

impl Connection {
    /// A fresh connection bound to the console.
    pub fn new() -> Self {
        Self {
            input: InputEndpoint::console(),
            output: OutputEndpoint::console(),
            cipher: CipherLayer::identity(),
            marks: MarkRegistry::new(),
            connected: false,
        }
    }

    /// Swap the active duplex channel to the given endpoints.
    ///
    /// The replaced endpoints are returned, not closed; the caller owns
    /// their lifecycle.
    pub fn connect_streams(
        &mut self,
        input: InputEndpoint,
        output: OutputEndpoint,
    ) -> (InputEndpoint, OutputEndpoint) {
        let old_input = std::mem::replace(&mut self.input, input);
        let old_output = std::mem::replace(&mut self.output, output);
        self.connected = true;
        (old_input, old_output)
    }

    /// Restore the console pair and drop the socket endpoints.
    pub fn disconnect_streams(&mut self) {
        self.input = InputEndpoint::console();
        self.output = OutputEndpoint::console();
        self.connected = false;
    }

    /// Whether the endpoints currently reference a peer socket.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The current readable endpoint.
    pub fn input_mut(&mut self) -> &mut InputEndpoint {
        &mut self.input
    }

    /// The current writable endpoint.
    pub fn output_mut(&mut self) -> &mut OutputEndpoint {
        &mut self.output
    }

    /// Both endpoints at once, for interleaved prompt/receive sequences.
    pub fn io_mut(&mut self) -> (&mut InputEndpoint, &mut OutputEndpoint) {
        (&mut self.input, &mut self.output)
    }

    /// Register a path for a later `download <id>` and return its id.
    pub fn mark_for_download(&mut self, path: PathBuf) -> u32 {
        self.marks.mark(path)
    }

    /// Resolve a previously assigned mark id.
    pub fn marked(&self, id: u32) -> Result<&Path> {
        self.marks.get(id)
    }

    /// Drop all download marks; ids restart at 0.
    pub fn clear_download_marks(&mut self) {
        self.marks.clear();
    }

    /// Number of currently marked paths.
    pub fn mark_count(&self) -> usize {
        self.marks.len()
    }

    /// The payload cipher, identity unless a key was set.
    pub fn cipher(&self) -> &CipherLayer {
        &self.cipher
    }

    /// Replace the payload cipher for subsequent transfers.
    pub fn set_cipher(&mut self, cipher: CipherLayer) {
        self.cipher = cipher;
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("cipher", &self.cipher)
            .field("connected", &self.connected)
            .field("marks", &self.marks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dialed = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        (dialed, accepted)
    }

    #[test]
    fn test_new_connection_is_disconnected() {
        let conn = Connection::new();
        assert!(!conn.is_connected());
        assert!(!conn.cipher().is_active());
    }

    #[tokio::test]
    async fn test_connect_streams_sets_connected() {
        let (local, _remote) = tcp_pair().await;
        let (read_half, write_half) = local.into_split();

        let mut conn = Connection::new();
        let (old_input, old_output) = conn.connect_streams(
            InputEndpoint::socket(read_half),
            OutputEndpoint::socket(write_half),
        );

        assert!(conn.is_connected());
        // The replaced endpoints are handed back, not closed.
        assert!(matches!(old_input, InputEndpoint::Console(_)));
        assert!(matches!(old_output, OutputEndpoint::Console(_)));
    }

    #[tokio::test]
    async fn test_disconnect_restores_console() {
        let (local, _remote) = tcp_pair().await;
        let (read_half, write_half) = local.into_split();

        let mut conn = Connection::new();
        conn.connect_streams(
            InputEndpoint::socket(read_half),
            OutputEndpoint::socket(write_half),
        );
        conn.disconnect_streams();

        assert!(!conn.is_connected());
        assert!(matches!(conn.input_mut(), InputEndpoint::Console(_)));
        assert!(matches!(conn.output_mut(), OutputEndpoint::Console(_)));
    }

    #[tokio::test]
    async fn test_io_routes_through_socket_endpoints() {
        let (local, remote) = tcp_pair().await;
        let (read_half, write_half) = local.into_split();

        let mut conn = Connection::new();
        conn.connect_streams(
            InputEndpoint::socket(read_half),
            OutputEndpoint::socket(write_half),
        );

        // Write through the connection, observe on the raw peer socket.
        conn.output_mut().write_line("hello peer").await.unwrap();

        let (remote_read, mut remote_write) = remote.into_split();
        let mut reader = BufReader::new(remote_read);
        let mut line = String::new();
        tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut line)
            .await
            .unwrap();
        assert_eq!(line, "hello peer\n");

        // And the reverse direction.
        tokio::io::AsyncWriteExt::write_all(&mut remote_write, b"from peer\n")
            .await
            .unwrap();
        let line = conn.input_mut().read_line().await.unwrap().unwrap();
        assert_eq!(line, "from peer");
    }

    #[tokio::test]
    async fn test_read_line_none_on_peer_close() {
        let (local, remote) = tcp_pair().await;
        drop(remote);

        let (read_half, write_half) = local.into_split();
        let mut conn = Connection::new();
        conn.connect_streams(
            InputEndpoint::socket(read_half),
            OutputEndpoint::socket(write_half),
        );

        assert!(conn.input_mut().read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_endpoint_raw_reads_for_binary_mode() {
        let (local, remote) = tcp_pair().await;
        let (read_half, _write_half) = local.into_split();
        let mut input = InputEndpoint::socket(read_half);

        let (_remote_read, mut remote_write) = remote.into_split();
        tokio::io::AsyncWriteExt::write_all(&mut remote_write, &[1u8, 2, 3, 4])
            .await
            .unwrap();

        let mut buf = [0u8; 4];
        input.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_mark_delegation() {
        let mut conn = Connection::new();
        let id = conn.mark_for_download(PathBuf::from("/tmp/a"));
        assert_eq!(id, 0);
        assert_eq!(conn.marked(0).unwrap(), Path::new("/tmp/a"));
        assert_eq!(conn.mark_count(), 1);

        conn.clear_download_marks();
        assert!(conn.marked(0).is_err());
        assert_eq!(conn.mark_for_download(PathBuf::from("/tmp/b")), 0);
    }

    #[test]
    fn test_set_cipher() {
        let mut conn = Connection::new();
        conn.set_cipher(CipherLayer::from_passphrase("secret"));
        assert!(conn.cipher().is_active());
    }
}
