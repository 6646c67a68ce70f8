//! File and directory transfer over an established connection.
//!
//! The sender announces a transfer by writing the sentinel line, then
//! streams framed [`TransferMessage`]s: an offer, a pre-order sequence of
//! entries, and a terminator (`Done`, or `Abort` on a local failure). The
//! receiver never writes during a transfer, so each direction of the
//! socket keeps a single writer.
//!
//! Received files are streamed into a temporary `.part` file next to the
//! destination and renamed into place once complete, so a destination is
//! never partially written. A name collision without the overwrite flag
//! parks the temp file as a [`PendingCollision`]; the caller resolves it
//! by prompting whichever side is interactive.

use std::io;
use std::path::{Path, PathBuf};

use protocol::{
    decode_frame_header, encode_frame, CipherLayer, ProtocolError, TransferCipher, TransferKind,
    TransferMessage, FRAME_HEADER_SIZE, TRANSFER_CHUNK_SIZE, TRANSFER_SENTINEL,
};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{Result, ShellError};

/// Caller-supplied knobs for one transfer.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Replace existing destinations without prompting.
    pub overwrite: bool,
    /// Plaintext bytes per chunk.
    pub chunk_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            chunk_size: TRANSFER_CHUNK_SIZE,
        }
    }
}

/// What a completed send covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendSummary {
    /// Files streamed.
    pub files: usize,
    /// Plaintext bytes streamed.
    pub bytes: u64,
}

/// A received entry whose destination already exists and whose fate awaits
/// the interactive side's answer. The payload sits in `temp`; the original
/// at `dest` is untouched until [`resolve`](Self::resolve).
#[derive(Debug)]
pub struct PendingCollision {
    /// Completed temporary file holding the received payload.
    pub temp: PathBuf,
    /// The colliding destination.
    pub dest: PathBuf,
}

impl PendingCollision {
    /// The destination name to show in a prompt.
    pub fn display_name(&self) -> String {
        self.dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.dest.display().to_string())
    }

    /// Apply the decision: replace the destination, or discard the payload
    /// and leave the original untouched.
    pub async fn resolve(self, overwrite: bool) -> io::Result<bool> {
        if overwrite {
            fs::rename(&self.temp, &self.dest).await?;
            Ok(true)
        } else {
            fs::remove_file(&self.temp).await?;
            Ok(false)
        }
    }
}

/// What a completed receive produced.
#[derive(Debug)]
pub struct ReceiveOutcome {
    /// The written destination: the file itself, or the tree root.
    pub root: PathBuf,
    /// Files received (written, replaced, or parked).
    pub files: usize,
    /// Plaintext bytes received.
    pub bytes: u64,
    /// Collisions awaiting an overwrite decision.
    pub pending: Vec<PendingCollision>,
}

// ---------------------------------------------------------------------------
// Frame I/O
// ---------------------------------------------------------------------------

/// Write one framed message.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &TransferMessage,
) -> Result<()> {
    let payload = message.to_msgpack().map_err(ProtocolError::from)?;
    let frame = encode_frame(&payload)?;
    writer.write_all(&frame).await.map_err(ProtocolError::from)?;
    Ok(())
}

/// Read one framed message.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<TransferMessage> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .await
        .map_err(ProtocolError::from)?;
    let payload_len = decode_frame_header(&header)?;

    let mut payload = vec![0u8; payload_len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(ProtocolError::from)?;

    let message = TransferMessage::from_msgpack(&payload).map_err(ProtocolError::from)?;
    Ok(message)
}

fn message_label(message: &TransferMessage) -> &'static str {
    match message {
        TransferMessage::Offer { .. } => "offer",
        TransferMessage::EnterDir { .. } => "enter-dir",
        TransferMessage::FileHeader { .. } => "file-header",
        TransferMessage::Chunk { .. } => "chunk",
        TransferMessage::LeaveDir => "leave-dir",
        TransferMessage::Done => "done",
        TransferMessage::Abort { .. } => "abort",
    }
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

/// Send a file or directory tree over the connection's output stream.
///
/// Writes the sentinel line first, so the caller must be in text mode.
/// On a local failure after the sentinel, an `Abort` terminator is sent so
/// the receiver returns cleanly to text mode; socket failures propagate as
/// connection loss.
pub async fn send_path<W: AsyncWrite + Unpin>(
    writer: &mut W,
    cipher: &CipherLayer,
    source: &Path,
    options: &TransferOptions,
) -> Result<SendSummary> {
    let metadata = fs::metadata(source).await.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            ShellError::NotFound(source.to_path_buf())
        } else {
            ShellError::Io(e)
        }
    })?;

    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ProtocolError::TransferFailed(format!(
                "source has no transferable name: {}",
                source.display()
            ))
        })?
        .to_string();

    let mut seal = cipher.begin_seal();
    let kind = if metadata.is_dir() {
        TransferKind::Tree
    } else {
        TransferKind::File
    };

    debug!(source = %source.display(), ?kind, encrypted = seal.is_some(), "starting transfer");

    // Mode switch, then the offer.
    writer
        .write_all(TRANSFER_SENTINEL.as_bytes())
        .await
        .map_err(ProtocolError::from)?;
    writer.write_all(b"\n").await.map_err(ProtocolError::from)?;

    write_message(
        writer,
        &TransferMessage::Offer {
            name: name.clone(),
            kind,
            overwrite: options.overwrite,
            encrypted: seal.is_some(),
            nonce_base: seal.as_ref().map(|s| s.nonce_base()),
        },
    )
    .await?;

    let result = match kind {
        TransferKind::File => {
            send_file(writer, &mut seal, source, &name, &metadata, options.chunk_size)
                .await
                .map(|bytes| SendSummary { files: 1, bytes })
        }
        TransferKind::Tree => send_tree(writer, &mut seal, source, options.chunk_size).await,
    };

    match result {
        Ok(summary) => {
            write_message(writer, &TransferMessage::Done).await?;
            writer.flush().await.map_err(ProtocolError::from)?;
            debug!(files = summary.files, bytes = summary.bytes, "transfer complete");
            Ok(summary)
        }
        Err(err) if !err.is_connection_loss() => {
            // The receiver needs a terminator to return to text mode.
            write_message(
                writer,
                &TransferMessage::Abort {
                    reason: err.to_string(),
                },
            )
            .await?;
            writer.flush().await.map_err(ProtocolError::from)?;
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Stream one file: header, then its chunks. Returns the bytes sent.
async fn send_file<W: AsyncWrite + Unpin>(
    writer: &mut W,
    seal: &mut Option<TransferCipher>,
    path: &Path,
    name: &str,
    metadata: &std::fs::Metadata,
    chunk_size: usize,
) -> Result<u64> {
    let size = metadata.len();
    let mode = unix_mode(metadata);

    write_message(
        writer,
        &TransferMessage::FileHeader {
            name: name.to_string(),
            size,
            mode,
        },
    )
    .await?;

    let mut file = File::open(path).await?;
    let mut buffer = vec![0u8; chunk_size];
    let mut remaining = size;

    while remaining > 0 {
        let want = chunk_size.min(remaining as usize);
        let bytes_read = file.read(&mut buffer[..want]).await?;
        if bytes_read == 0 {
            return Err(ProtocolError::TransferFailed(format!(
                "source truncated during transfer: {}",
                path.display()
            ))
            .into());
        }

        let data = match seal {
            Some(cipher) => cipher.seal_chunk(&buffer[..bytes_read])?,
            None => buffer[..bytes_read].to_vec(),
        };
        write_message(writer, &TransferMessage::Chunk { data }).await?;
        remaining -= bytes_read as u64;
    }

    Ok(size)
}

/// One directory level of a pre-order walk, children sorted by name.
struct WalkLevel {
    entries: std::vec::IntoIter<WalkEntry>,
}

struct WalkEntry {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

async fn read_level(dir: &Path) -> Result<WalkLevel> {
    let mut entries = Vec::new();
    let mut read_dir = fs::read_dir(dir).await?;

    while let Some(entry) = read_dir.next_entry().await? {
        let file_type = entry.file_type().await?;
        if !file_type.is_file() && !file_type.is_dir() {
            warn!(path = %entry.path().display(), "skipping non-regular entry");
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!(name = ?raw, "skipping entry with non-UTF-8 name");
                continue;
            }
        };
        entries.push(WalkEntry {
            name,
            path: entry.path(),
            is_dir: file_type.is_dir(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(WalkLevel {
        entries: entries.into_iter(),
    })
}

/// Stream a directory tree in pre-order with an explicit level stack.
async fn send_tree<W: AsyncWrite + Unpin>(
    writer: &mut W,
    seal: &mut Option<TransferCipher>,
    root: &Path,
    chunk_size: usize,
) -> Result<SendSummary> {
    let mut stack = vec![read_level(root).await?];
    let mut files = 0usize;
    let mut bytes = 0u64;

    loop {
        let next = match stack.last_mut() {
            Some(level) => level.entries.next(),
            None => break,
        };
        match next {
            Some(entry) if entry.is_dir => {
                write_message(
                    writer,
                    &TransferMessage::EnterDir {
                        name: entry.name.clone(),
                    },
                )
                .await?;
                let child = read_level(&entry.path).await?;
                stack.push(child);
            }
            Some(entry) => {
                let metadata = fs::metadata(&entry.path).await?;
                bytes +=
                    send_file(writer, seal, &entry.path, &entry.name, &metadata, chunk_size)
                        .await?;
                files += 1;
            }
            None => {
                stack.pop();
                if !stack.is_empty() {
                    write_message(writer, &TransferMessage::LeaveDir).await?;
                }
            }
        }
    }

    Ok(SendSummary { files, bytes })
}

// ---------------------------------------------------------------------------
// Receiving
// ---------------------------------------------------------------------------

/// Receive one transfer into `dest_dir`.
///
/// Called after the sentinel line has been read; consumes the stream up to
/// and including the terminator, so text mode resumes at the next read.
/// Collisions without the overwrite flag come back as `pending` for the
/// caller to resolve against the interactive side.
pub async fn receive_transfer<R: AsyncRead + Unpin>(
    reader: &mut R,
    cipher: &CipherLayer,
    dest_dir: &Path,
) -> Result<ReceiveOutcome> {
    let (name, kind, overwrite, encrypted, nonce_base) = match read_message(reader).await? {
        TransferMessage::Offer {
            name,
            kind,
            overwrite,
            encrypted,
            nonce_base,
        } => (name, kind, overwrite, encrypted, nonce_base),
        other => {
            return Err(ProtocolError::ProtocolViolation(format!(
                "expected offer, got {}",
                message_label(&other)
            ))
            .into())
        }
    };

    let mut opener = if encrypted {
        if !cipher.is_active() {
            return Err(fail_and_drain(reader, ProtocolError::CipherRequired.into()).await);
        }
        match nonce_base {
            Some(base) => cipher.begin_open(base),
            None => {
                let err = ProtocolError::ProtocolViolation(
                    "encrypted offer without a nonce base".to_string(),
                );
                return Err(fail_and_drain(reader, err.into()).await);
            }
        }
    } else {
        None
    };

    let root_name = match sanitize_name(&name) {
        Ok(name) => name,
        Err(err) => return Err(fail_and_drain(reader, err).await),
    };

    debug!(name = %root_name, ?kind, encrypted, "receiving transfer");

    let mut dir_stack: Vec<PathBuf> = match kind {
        TransferKind::File => vec![dest_dir.to_path_buf()],
        TransferKind::Tree => {
            let root = dest_dir.join(&root_name);
            if let Err(e) = fs::create_dir_all(&root).await {
                return Err(fail_and_drain(reader, e.into()).await);
            }
            vec![root]
        }
    };
    let tree_root = dir_stack[0].clone();

    let mut files = 0usize;
    let mut bytes = 0u64;
    let mut pending: Vec<PendingCollision> = Vec::new();
    let mut written_root: Option<PathBuf> = None;

    loop {
        let message = match read_message(reader).await {
            Ok(message) => message,
            Err(err) => {
                cleanup_pending(&mut pending).await;
                return Err(err);
            }
        };

        match message {
            TransferMessage::FileHeader { name, size, mode } => {
                let name = match sanitize_name(&name) {
                    Ok(name) => name,
                    Err(err) => {
                        cleanup_pending(&mut pending).await;
                        return Err(fail_and_drain(reader, err).await);
                    }
                };
                let dir = match dir_stack.last() {
                    Some(dir) => dir.clone(),
                    None => {
                        // Unreachable by construction; LeaveDir never pops the root.
                        cleanup_pending(&mut pending).await;
                        let err =
                            ProtocolError::ProtocolViolation("empty directory stack".to_string());
                        return Err(fail_and_drain(reader, err.into()).await);
                    }
                };

                match receive_file(reader, &mut opener, &dir, &name, size, mode, overwrite).await
                {
                    Ok(outcome) => {
                        files += 1;
                        bytes += size;
                        match outcome {
                            FileOutcome::Written(path) | FileOutcome::Replaced(path) => {
                                written_root.get_or_insert(path);
                            }
                            FileOutcome::Parked(collision) => {
                                written_root.get_or_insert(collision.dest.clone());
                                pending.push(collision);
                            }
                        }
                    }
                    Err(err) => {
                        cleanup_pending(&mut pending).await;
                        return Err(fail_and_drain(reader, err).await);
                    }
                }
            }
            TransferMessage::EnterDir { name } => {
                let name = match sanitize_name(&name) {
                    Ok(name) => name,
                    Err(err) => {
                        cleanup_pending(&mut pending).await;
                        return Err(fail_and_drain(reader, err).await);
                    }
                };
                let dir = match dir_stack.last() {
                    Some(dir) => dir.join(&name),
                    None => {
                        cleanup_pending(&mut pending).await;
                        let err =
                            ProtocolError::ProtocolViolation("empty directory stack".to_string());
                        return Err(fail_and_drain(reader, err.into()).await);
                    }
                };
                if let Err(e) = fs::create_dir_all(&dir).await {
                    cleanup_pending(&mut pending).await;
                    return Err(fail_and_drain(reader, e.into()).await);
                }
                dir_stack.push(dir);
            }
            TransferMessage::LeaveDir => {
                if dir_stack.len() <= 1 {
                    cleanup_pending(&mut pending).await;
                    let err = ProtocolError::ProtocolViolation(
                        "leave-dir below the transfer root".to_string(),
                    );
                    return Err(fail_and_drain(reader, err.into()).await);
                }
                dir_stack.pop();
            }
            TransferMessage::Done => break,
            TransferMessage::Abort { reason } => {
                cleanup_pending(&mut pending).await;
                return Err(ProtocolError::TransferFailed(format!("sender aborted: {reason}")).into());
            }
            other => {
                cleanup_pending(&mut pending).await;
                let err = ProtocolError::ProtocolViolation(format!(
                    "unexpected {} between entries",
                    message_label(&other)
                ));
                return Err(fail_and_drain(reader, err.into()).await);
            }
        }
    }

    let root = match kind {
        TransferKind::Tree => tree_root,
        TransferKind::File => written_root.unwrap_or(tree_root),
    };

    debug!(files, bytes, pending = pending.len(), "receive complete");
    Ok(ReceiveOutcome {
        root,
        files,
        bytes,
        pending,
    })
}

/// What happened to one received file.
enum FileOutcome {
    /// Written to a fresh destination.
    Written(PathBuf),
    /// Destination existed; replaced under the overwrite flag.
    Replaced(PathBuf),
    /// Destination existed without the flag; payload parked.
    Parked(PendingCollision),
}

/// Receive one file's chunks into a temp file and settle its disposition.
async fn receive_file<R: AsyncRead + Unpin>(
    reader: &mut R,
    opener: &mut Option<TransferCipher>,
    dir: &Path,
    name: &str,
    size: u64,
    mode: u32,
    overwrite: bool,
) -> Result<FileOutcome> {
    let dest = dir.join(name);
    let temp = dir.join(format!(".{name}.part"));

    match receive_file_inner(reader, opener, &temp, size, mode).await {
        Ok(()) => {}
        Err(err) => {
            let _ = fs::remove_file(&temp).await;
            return Err(err);
        }
    }

    let exists = fs::try_exists(&dest).await.unwrap_or(false);
    if !exists {
        fs::rename(&temp, &dest).await?;
        Ok(FileOutcome::Written(dest))
    } else if overwrite {
        fs::rename(&temp, &dest).await?;
        Ok(FileOutcome::Replaced(dest))
    } else {
        Ok(FileOutcome::Parked(PendingCollision { temp, dest }))
    }
}

async fn receive_file_inner<R: AsyncRead + Unpin>(
    reader: &mut R,
    opener: &mut Option<TransferCipher>,
    temp: &Path,
    size: u64,
    mode: u32,
) -> Result<()> {
    let mut file = File::create(temp).await?;
    let mut received = 0u64;

    while received < size {
        match read_message(reader).await? {
            TransferMessage::Chunk { data } => {
                let plain = match opener {
                    Some(cipher) => cipher.open_chunk(&data)?,
                    None => data,
                };
                if plain.is_empty() {
                    return Err(ProtocolError::ProtocolViolation(
                        "empty chunk inside a file body".to_string(),
                    )
                    .into());
                }
                received += plain.len() as u64;
                if received > size {
                    return Err(ProtocolError::ProtocolViolation(
                        "chunk overruns the announced file size".to_string(),
                    )
                    .into());
                }
                file.write_all(&plain).await?;
            }
            other => {
                return Err(ProtocolError::ProtocolViolation(format!(
                    "expected chunk inside a file body, got {}",
                    message_label(&other)
                ))
                .into())
            }
        }
    }

    file.flush().await?;
    drop(file);

    #[cfg(unix)]
    if mode != 0 {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(temp, std::fs::Permissions::from_mode(mode & 0o7777)).await?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

/// Consume frames until the transfer terminator so text mode stays in sync
/// after a local failure. Socket errors are left to the caller's
/// classification.
async fn drain_transfer<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
    loop {
        match read_message(reader).await? {
            TransferMessage::Done | TransferMessage::Abort { .. } => return Ok(()),
            _ => continue,
        }
    }
}

/// Attach drain behavior to a local receive failure: the remaining frames
/// are consumed (best effort) so the session survives the failed transfer.
async fn fail_and_drain<R: AsyncRead + Unpin>(reader: &mut R, err: ShellError) -> ShellError {
    if !err.is_connection_loss() {
        if let Err(drain_err) = drain_transfer(reader).await {
            warn!(error = %drain_err, "failed to drain aborted transfer");
            return drain_err;
        }
    }
    err
}

async fn cleanup_pending(pending: &mut Vec<PendingCollision>) {
    for collision in pending.drain(..) {
        if let Err(e) = fs::remove_file(&collision.temp).await {
            warn!(path = %collision.temp.display(), error = %e, "failed to remove parked temp file");
        }
    }
}

/// Interpret an overwrite-prompt answer; anything but an explicit yes
/// keeps the original.
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim(), "y" | "Y" | "yes" | "Yes" | "YES")
}

/// Entry names cross a trust boundary; only bare names are acceptable.
fn sanitize_name(name: &str) -> Result<String> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(ProtocolError::ProtocolViolation(format!(
            "illegal entry name in transfer: {name:?}"
        ))
        .into());
    }
    Ok(name.to_string())
}

fn unix_mode(metadata: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o7777
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        0
    }
}
