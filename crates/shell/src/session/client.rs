//! Session client: dial a host and drive its shell from this console.
//!
//! Two loops share the one socket. The reader loop drains host output to
//! the local console and yields to the binary receiver when a line is the
//! transfer sentinel; the writer loop forwards typed lines to the socket,
//! intercepting `exit` (end the session) and `upload` (push a local file
//! to the host). The loops run concurrently because the host can produce
//! output, including transfer payloads, at any time, independent of when
//! the user next types a line.
//!
//! The loops share exactly two pieces of state: the cancellation token,
//! and a [`PromptRelay`] that routes one typed line to an overwrite prompt
//! raised by the reader during a download.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use protocol::{is_mode_switch, CipherLayer};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, ShellError};
use crate::transfer::{self, is_yes, TransferOptions};

/// Routes one typed console line to a prompt raised by the reader task.
///
/// The writer loop owns stdin and the reader task owns the socket, so an
/// overwrite question asked mid-download needs this handoff: the reader
/// arms the relay and waits, and the writer delivers the next typed line
/// to it instead of the socket.
#[derive(Clone)]
pub struct PromptRelay {
    armed: Arc<AtomicBool>,
    tx: mpsc::Sender<String>,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl PromptRelay {
    /// A fresh, unarmed relay.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            armed: Arc::new(AtomicBool::new(false)),
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Whether a prompt is waiting for the next typed line.
    pub fn awaiting(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Arm the relay before printing the prompt, so no typed line slips
    /// past to the socket in between.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// Deliver a typed line to the armed prompt.
    pub async fn deliver(&self, line: String) {
        let _ = self.tx.send(line).await;
    }

    /// Wait for the answer, disarming the relay. `None` means the console
    /// closed before an answer arrived.
    pub async fn wait_answer(&self) -> Option<String> {
        let answer = self.rx.lock().await.recv().await;
        self.armed.store(false, Ordering::Release);
        answer
    }
}

impl Default for PromptRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// A client session: dial, run both loops, return when the session ends.
#[derive(Debug)]
pub struct SessionClient {
    host: String,
    port: u16,
    cipher: CipherLayer,
    options: TransferOptions,
    cwd: PathBuf,
}

impl SessionClient {
    /// Prepare a client for the given host and port.
    ///
    /// `cwd` is where downloads land and uploads are resolved against.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        cipher: CipherLayer,
        options: TransferOptions,
        cwd: PathBuf,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            cipher,
            options,
            cwd,
        }
    }

    /// Dial the host and run the session until `exit` or disconnect.
    ///
    /// A dial failure is returned to the caller; it is fatal to this
    /// session only.
    pub async fn run(self) -> Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        info!(host = %self.host, port = self.port, "session established");

        let (read_half, write_half) = stream.into_split();
        let token = CancellationToken::new();
        let relay = PromptRelay::new();

        let reader = tokio::spawn(forward_remote_output(
            BufReader::new(read_half),
            tokio::io::stdout(),
            self.cipher.clone(),
            self.cwd.clone(),
            relay.clone(),
            token.clone(),
        ));

        let writer_result = forward_local_input(
            BufReader::new(tokio::io::stdin()),
            write_half,
            tokio::io::stdout(),
            self.cipher,
            self.cwd,
            self.options,
            relay,
            token.clone(),
        )
        .await;

        // The writer cancelled (or failed); stop the reader before
        // returning so nothing races the caller's console output.
        token.cancel();
        match reader.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "reader loop ended with error"),
            Err(e) => warn!(error = %e, "reader task failed"),
        }

        let mut console = tokio::io::stdout();
        let _ = console
            .write_all(format!("disconnected from {}:{}\n", self.host, self.port).as_bytes())
            .await;
        let _ = console.flush().await;

        writer_result
    }
}

/// The reader loop: socket lines to the console, transfers to disk.
///
/// Blocks only on socket reads; ends on socket close, a socket error, or
/// cancellation from the writer loop.
pub async fn forward_remote_output<R, W>(
    mut socket: BufReader<R>,
    mut console: W,
    cipher: CipherLayer,
    download_dir: PathBuf,
    relay: PromptRelay,
    token: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    loop {
        let mut line = String::new();
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            read = socket.read_line(&mut line) => {
                let bytes_read = match read {
                    Ok(n) => n,
                    Err(e) => {
                        token.cancel();
                        return Err(e.into());
                    }
                };
                if bytes_read == 0 {
                    let _ = console.write_all(b"connection closed by host\n").await;
                    let _ = console.flush().await;
                    token.cancel();
                    return Ok(());
                }

                if is_mode_switch(&line) {
                    match receive_download(&mut socket, &mut console, &cipher, &download_dir, &relay)
                        .await
                    {
                        Ok(()) => {}
                        Err(err) if err.is_connection_loss() => {
                            let _ = console.write_all(b"connection lost during transfer\n").await;
                            let _ = console.flush().await;
                            token.cancel();
                            return Err(err);
                        }
                        Err(err) => {
                            // The transfer failed but the stream was drained;
                            // the session continues.
                            console
                                .write_all(format!("transfer failed: {err}\n").as_bytes())
                                .await?;
                            console.flush().await?;
                        }
                    }
                } else {
                    console.write_all(line.as_bytes()).await?;
                    console.flush().await?;
                }
            }
        }
    }
}

/// Receive one host-initiated transfer and settle any collisions through
/// the prompt relay.
async fn receive_download<R, W>(
    socket: &mut BufReader<R>,
    console: &mut W,
    cipher: &CipherLayer,
    download_dir: &Path,
    relay: &PromptRelay,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let outcome = transfer::receive_transfer(socket, cipher, download_dir).await?;

    console
        .write_all(
            format!(
                "received {} file(s) ({} bytes) -> {}\n",
                outcome.files,
                outcome.bytes,
                outcome.root.display()
            )
            .as_bytes(),
        )
        .await?;
    console.flush().await?;

    for collision in outcome.pending {
        relay.arm();
        console
            .write_all(format!("overwrite {}? [y/N] ", collision.display_name()).as_bytes())
            .await?;
        console.flush().await?;

        let answer = relay.wait_answer().await.unwrap_or_default();
        let replaced = collision.resolve(is_yes(&answer)).await?;
        console
            .write_all(if replaced {
                b"replaced\n".as_slice()
            } else {
                b"kept original\n".as_slice()
            })
            .await?;
        console.flush().await?;
    }

    Ok(())
}

/// The writer loop: console lines to the socket.
///
/// Intercepts `exit` (forward, then cancel the reader and return) and
/// `upload` (push a local file over the same socket). Lines typed while a
/// prompt is armed answer the prompt instead of reaching the socket.
#[allow(clippy::too_many_arguments)]
pub async fn forward_local_input<R, W, N>(
    mut console: BufReader<R>,
    mut socket: W,
    mut notices: N,
    cipher: CipherLayer,
    cwd: PathBuf,
    options: TransferOptions,
    relay: PromptRelay,
    token: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    N: AsyncWrite + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    loop {
        let mut line = String::new();
        let bytes_read = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            read = console.read_line(&mut line) => read?,
        };

        if bytes_read == 0 {
            // Console EOF behaves like a typed exit.
            let _ = socket.write_all(b"exit\n").await;
            let _ = socket.flush().await;
            token.cancel();
            return Ok(());
        }

        let trimmed = line.trim();

        if relay.awaiting() {
            relay.deliver(trimmed.to_string()).await;
            continue;
        }

        if trimmed.eq_ignore_ascii_case("exit") {
            // Close only after the pending write completes.
            socket.write_all(b"exit\n").await?;
            socket.flush().await?;
            token.cancel();
            return Ok(());
        }

        if let Some(rest) = command_tail(trimmed, "upload") {
            match upload(&mut socket, &cipher, &cwd, &options, rest).await {
                Ok(summary) => {
                    notices
                        .write_all(
                            format!("sent {} file(s) ({} bytes)\n", summary.files, summary.bytes)
                                .as_bytes(),
                        )
                        .await?;
                    notices.flush().await?;
                }
                Err(err) if err.is_connection_loss() => {
                    let _ = notices.write_all(b"connection lost during transfer\n").await;
                    let _ = notices.flush().await;
                    token.cancel();
                    return Err(err);
                }
                Err(err) => {
                    notices
                        .write_all(format!("upload failed: {err}\n").as_bytes())
                        .await?;
                    notices.flush().await?;
                }
            }
            continue;
        }

        if !line.ends_with('\n') {
            line.push('\n');
        }
        if let Err(e) = socket.write_all(line.as_bytes()).await {
            let _ = notices.write_all(b"connection lost\n").await;
            let _ = notices.flush().await;
            token.cancel();
            return Err(e.into());
        }
        socket.flush().await.map_err(ShellError::from)?;
    }
}

/// Push one local file or tree to the host.
async fn upload<W: AsyncWrite + Unpin>(
    socket: &mut W,
    cipher: &CipherLayer,
    cwd: &Path,
    options: &TransferOptions,
    args: &str,
) -> Result<transfer::SendSummary> {
    let (overwrite, path_arg) = match args.strip_prefix("-f ") {
        Some(rest) => (true, rest.trim()),
        None => (options.overwrite, args.trim()),
    };
    if path_arg.is_empty() {
        return Err(ShellError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "usage: upload [-f] <path>",
        )));
    }

    let candidate = Path::new(path_arg);
    let source = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        cwd.join(candidate)
    };

    let send_options = TransferOptions {
        overwrite,
        chunk_size: options.chunk_size,
    };
    transfer::send_path(socket, cipher, &source, &send_options).await
}

/// Split `line` into a known command and its argument tail.
///
/// Matches the bare command or the command followed by whitespace, so
/// `uploading.txt` is never mistaken for `upload`.
fn command_tail<'a>(line: &'a str, command: &str) -> Option<&'a str> {
    if line.len() == command.len() {
        line.eq_ignore_ascii_case(command).then_some("")
    } else {
        let (head, tail) = line.split_at_checked(command.len())?;
        (head.eq_ignore_ascii_case(command) && tail.starts_with(char::is_whitespace))
            .then_some(tail.trim_start())
    }
}
