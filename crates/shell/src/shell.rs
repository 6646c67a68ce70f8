//! The interactive command loop.
//!
//! One loop serves both the local console and a remote peer: commands are
//! read from the connection's current input endpoint and results written
//! to its current output endpoint, so hosting a session redirects the
//! whole loop to the socket without the command handlers noticing.
//!
//! Command parsing is deliberately thin, whitespace splitting and a
//! single `-f` flag; the transport underneath is where the machinery is.

use std::path::PathBuf;

use protocol::CipherLayer;
use tokio::fs;
use tracing::{info, warn};

use crate::config::Config;
use crate::connection::{InputEndpoint, OutputEndpoint};
use crate::env::ShellEnv;
use crate::error::Result;
use crate::session::{SessionClient, SessionHost};
use crate::transfer::{self, is_yes, TransferOptions};

const HELP_TEXT: &str = "\
commands:
  ls [path]              list a directory and number entries for download
  cd <path>              change the working directory
  pwd                    print the working directory
  host <port> | host     accept a remote session (bare form reuses the listener)
  connect <host> <port>  drive a remote ferrysh host
  download [-f] <id|path>  send a file or tree to the connected peer
  upload [-f] <path>     push a local file to the host (connecting side only)
  key <passphrase>       enable transfer encryption (both sides, before connecting)
  exit                   leave the session, or quit the shell";

/// What the main loop should do after a handled line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Keep reading commands.
    Continue,
    /// Quit the shell.
    Quit,
}

/// The interactive shell: configuration, environment, and the optional
/// session listener.
pub struct Shell {
    config: Config,
    env: ShellEnv,
    host: Option<SessionHost>,
}

impl Shell {
    /// Create a shell rooted at the process working directory.
    pub fn new(config: Config) -> std::io::Result<Self> {
        let cwd = std::env::current_dir()?;
        Ok(Self::with_cwd(config, cwd))
    }

    /// Create a shell rooted at an explicit working directory.
    pub fn with_cwd(config: Config, cwd: PathBuf) -> Self {
        let mut env = ShellEnv::new(cwd);
        if let Some(passphrase) = &config.security.passphrase {
            env.connection_mut()
                .set_cipher(CipherLayer::from_passphrase(passphrase));
        }
        Self {
            config,
            env,
            host: None,
        }
    }

    /// The shell environment (exposed for integration tests).
    pub fn env_mut(&mut self) -> &mut ShellEnv {
        &mut self.env
    }

    /// Run the command loop until the user quits.
    pub async fn run(&mut self) -> Result<()> {
        self.env
            .writeln("ferrysh - type 'help' for commands")
            .await?;

        loop {
            // The prompt stays local: the client's reader is line-oriented
            // and would sit on an unterminated prompt forever.
            if !self.env.connection().is_connected() {
                self.env.write("ferrysh> ").await?;
            }

            match self.env.read_line().await {
                Ok(Some(line)) => {
                    if self.handle_line(&line).await == LoopAction::Quit {
                        break;
                    }
                }
                Ok(None) => {
                    if self.env.connection().is_connected() {
                        self.end_session("peer disconnected").await;
                    } else {
                        break;
                    }
                }
                Err(e) => {
                    if self.env.connection().is_connected() {
                        self.end_session(&format!("session I/O error: {e}")).await;
                    } else {
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Handle one input line: a mode switch, or a command.
    pub async fn handle_line(&mut self, line: &str) -> LoopAction {
        if protocol::is_mode_switch(line) {
            self.receive_incoming().await;
            return LoopAction::Continue;
        }

        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return LoopAction::Continue;
        };
        let args: Vec<&str> = parts.collect();

        match command.to_ascii_lowercase().as_str() {
            "help" => self.say(HELP_TEXT).await,
            "pwd" => {
                let cwd = self.env.current_path().display().to_string();
                self.say(&cwd).await;
            }
            "ls" | "list" => self.cmd_list(&args).await,
            "cd" => self.cmd_cd(&args).await,
            "download" => self.cmd_download(&args).await,
            "upload" => {
                self.say("upload runs on the connecting side").await;
            }
            "host" => self.cmd_host(&args).await,
            "connect" => self.cmd_connect(&args).await,
            "key" => self.cmd_key(&args).await,
            "exit" => {
                if self.env.connection().is_connected() {
                    self.say("bye").await;
                    self.end_session("peer requested exit").await;
                } else {
                    return LoopAction::Quit;
                }
            }
            other => {
                let message = format!("unknown command: {other}");
                self.say(&message).await;
            }
        }
        LoopAction::Continue
    }

    /// Write one line to the active output, restoring the console if the
    /// session stream has failed underneath us.
    async fn say(&mut self, text: &str) {
        if self.env.writeln(text).await.is_err() && self.env.connection().is_connected() {
            self.env.connection_mut().disconnect_streams();
            warn!("session write failed; console restored");
            let _ = self.env.writeln("session ended: write failure").await;
        }
    }

    /// Tear down the active session and resume the console.
    async fn end_session(&mut self, reason: &str) {
        self.env.connection_mut().disconnect_streams();
        info!(reason, "session ended");
        let _ = self
            .env
            .writeln(&format!("session ended: {reason}"))
            .await;
    }

    /// `ls [path]`: list a directory and repopulate the download marks.
    async fn cmd_list(&mut self, args: &[&str]) {
        let dir = if args.is_empty() {
            self.env.current_path().to_path_buf()
        } else {
            self.env.resolve(&args.join(" "))
        };

        let mut entries = Vec::new();
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) => {
                let message = format!("ls: {}: {e}", dir.display());
                self.say(&message).await;
                return;
            }
        };
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => {
                    let Ok(name) = entry.file_name().into_string() else {
                        continue;
                    };
                    let is_dir = entry
                        .file_type()
                        .await
                        .map(|t| t.is_dir())
                        .unwrap_or(false);
                    let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                    entries.push((name, entry.path(), is_dir, size));
                }
                Ok(None) => break,
                Err(e) => {
                    let message = format!("ls: {e}");
                    self.say(&message).await;
                    return;
                }
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        // A fresh listing is a fresh set of marks; ids restart at 0.
        let conn = self.env.connection_mut();
        conn.clear_download_marks();
        let mut lines = Vec::with_capacity(entries.len());
        for (name, path, is_dir, size) in entries {
            let id = conn.mark_for_download(path);
            if is_dir {
                lines.push(format!("[{id}] {name}/"));
            } else {
                lines.push(format!("[{id}] {name} ({size} bytes)"));
            }
        }

        if lines.is_empty() {
            self.say("(empty)").await;
        }
        for line in lines {
            self.say(&line).await;
        }
    }

    /// `cd <path>`.
    async fn cmd_cd(&mut self, args: &[&str]) {
        if args.is_empty() {
            self.say("usage: cd <path>").await;
            return;
        }
        let target = self.env.resolve(&args.join(" "));
        match fs::canonicalize(&target).await {
            Ok(canonical) => match fs::metadata(&canonical).await {
                Ok(metadata) if metadata.is_dir() => {
                    self.env.set_current_path(canonical);
                }
                Ok(_) => {
                    let message = format!("cd: not a directory: {}", target.display());
                    self.say(&message).await;
                }
                Err(e) => {
                    let message = format!("cd: {}: {e}", target.display());
                    self.say(&message).await;
                }
            },
            Err(e) => {
                let message = format!("cd: {}: {e}", target.display());
                self.say(&message).await;
            }
        }
    }

    /// `download [-f] <id|path>`: send a file or tree to the peer.
    ///
    /// Runs on the hosting side (the command arrives over the session);
    /// the receiving client resolves collisions with its local user.
    async fn cmd_download(&mut self, args: &[&str]) {
        if !self.env.connection().is_connected() {
            self.say("download requires an active session").await;
            return;
        }

        let (overwrite, target) = match args.split_first() {
            Some((&"-f", rest)) => (true, rest.join(" ")),
            _ => (self.config.transfer.overwrite, args.join(" ")),
        };
        if target.is_empty() {
            self.say("usage: download [-f] <id|path>").await;
            return;
        }

        // A small integer names a marked entry from the last listing.
        let source = match target.parse::<u32>() {
            Ok(id) => {
                let marked = self
                    .env
                    .connection()
                    .marked(id)
                    .map(|path| path.to_path_buf());
                match marked {
                    Ok(path) => path,
                    Err(e) => {
                        let message = e.to_string();
                        self.say(&message).await;
                        return;
                    }
                }
            }
            Err(_) => self.env.resolve(&target),
        };

        let options = TransferOptions {
            overwrite,
            chunk_size: self.config.transfer.chunk_size as usize,
        };
        let cipher = self.env.connection().cipher().clone();

        // Announced in text mode, before the sentinel.
        let announcement = format!("sending {}", source.display());
        self.say(&announcement).await;

        let result = transfer::send_path(
            self.env.connection_mut().output_mut(),
            &cipher,
            &source,
            &options,
        )
        .await;

        match result {
            Ok(summary) => {
                let message =
                    format!("sent {} file(s) ({} bytes)", summary.files, summary.bytes);
                self.say(&message).await;
            }
            Err(e) if e.is_connection_loss() => {
                self.end_session("connection lost during transfer").await;
            }
            Err(e) => {
                let message = format!("download failed: {e}");
                self.say(&message).await;
            }
        }
    }

    /// The peer announced a transfer (an upload): receive it into the
    /// working directory and settle collisions over the text channel.
    async fn receive_incoming(&mut self) {
        if !self.env.connection().is_connected() {
            self.say("transfer announcement outside a session; ignored")
                .await;
            return;
        }

        let cipher = self.env.connection().cipher().clone();
        let dest = self.env.current_path().to_path_buf();
        let outcome = {
            let input = self.env.connection_mut().input_mut();
            transfer::receive_transfer(input, &cipher, &dest).await
        };

        match outcome {
            Ok(outcome) => {
                let message = format!(
                    "received {} file(s) ({} bytes) -> {}",
                    outcome.files,
                    outcome.bytes,
                    outcome.root.display()
                );
                self.say(&message).await;

                // The interactive side sits at the other end of the text
                // channel; each prompt travels there as an ordinary line.
                let mut pending = outcome.pending;
                pending.reverse();
                while let Some(collision) = pending.pop() {
                    let prompt = format!("overwrite {}? [y/N]", collision.display_name());
                    self.say(&prompt).await;

                    let answer = match self.env.read_line().await {
                        Ok(Some(answer)) => answer,
                        disconnect => {
                            // Unanswered prompts keep their originals.
                            let _ = collision.resolve(false).await;
                            while let Some(rest) = pending.pop() {
                                let _ = rest.resolve(false).await;
                            }
                            match disconnect {
                                Err(e) => {
                                    self.end_session(&format!("session I/O error: {e}")).await
                                }
                                _ => self.end_session("peer disconnected").await,
                            }
                            return;
                        }
                    };

                    match collision.resolve(is_yes(&answer)).await {
                        Ok(true) => self.say("replaced").await,
                        Ok(false) => self.say("kept original").await,
                        Err(e) => {
                            let message = format!("failed to finalize: {e}");
                            self.say(&message).await;
                        }
                    }
                }
            }
            Err(e) if e.is_connection_loss() => {
                self.end_session("connection lost during transfer").await;
            }
            Err(e) => {
                let message = format!("transfer failed: {e}");
                self.say(&message).await;
            }
        }
    }

    /// `host <port>` binds and serves one session; bare `host` accepts the
    /// next session on the existing listener, or binds the default port.
    async fn cmd_host(&mut self, args: &[&str]) {
        if self.env.connection().is_connected() {
            self.say("a session is already active").await;
            return;
        }

        // An explicit port always rebinds; bare `host` reuses the existing
        // listener, or binds the configured default port.
        let rebind = match args.first() {
            Some(arg) => match arg.parse::<u16>() {
                Ok(port) => Some(port),
                Err(_) => {
                    self.say("usage: host <port>").await;
                    return;
                }
            },
            None if self.host.is_none() => Some(self.config.session.default_port),
            None => None,
        };
        if let Some(port) = rebind {
            match SessionHost::bind(port).await {
                Ok(host) => self.host = Some(host),
                Err(e) => {
                    let message = format!("host: failed to bind port {port}: {e}");
                    self.say(&message).await;
                    return;
                }
            }
        }

        let port = match &self.host {
            Some(host) => host.local_port().unwrap_or(0),
            None => return,
        };
        let message = format!("listening on port {port} - waiting for a peer");
        self.say(&message).await;

        let accepted = match &self.host {
            Some(host) => host.accept().await,
            None => return,
        };

        match accepted {
            Ok((read_half, write_half, addr)) => {
                self.env.connection_mut().connect_streams(
                    InputEndpoint::socket(read_half),
                    OutputEndpoint::socket(write_half),
                );
                info!(peer = %addr, "session bound to shell");
                // The greeting is the first line the peer sees.
                self.say("ferrysh host ready - type 'help' for commands, 'exit' to disconnect")
                    .await;
            }
            Err(e) => {
                let message = format!("host: accept failed: {e}");
                self.say(&message).await;
            }
        }
    }

    /// `connect <host> <port>`: drive a remote host until exit.
    async fn cmd_connect(&mut self, args: &[&str]) {
        if self.env.connection().is_connected() {
            self.say("a session is already active").await;
            return;
        }

        let (host_addr, port) = match args {
            [host, port] => match port.parse::<u16>() {
                Ok(port) => (host.to_string(), port),
                Err(_) => {
                    self.say("usage: connect <host> <port>").await;
                    return;
                }
            },
            _ => {
                self.say("usage: connect <host> <port>").await;
                return;
            }
        };

        let options = TransferOptions {
            overwrite: self.config.transfer.overwrite,
            chunk_size: self.config.transfer.chunk_size as usize,
        };
        let client = SessionClient::new(
            host_addr.clone(),
            port,
            self.env.connection().cipher().clone(),
            options,
            self.env.current_path().to_path_buf(),
        );

        let message = format!("connecting to {host_addr}:{port}");
        self.say(&message).await;

        match client.run().await {
            Ok(()) => {}
            Err(e) => {
                let message = format!("connect: {e}");
                self.say(&message).await;
            }
        }
    }

    /// `key <passphrase>`: enable transfer encryption for this side.
    async fn cmd_key(&mut self, args: &[&str]) {
        if self.env.connection().is_connected() {
            self.say("set the key before hosting or connecting").await;
            return;
        }
        match args.first() {
            Some(passphrase) => {
                self.env
                    .connection_mut()
                    .set_cipher(CipherLayer::from_passphrase(passphrase));
                self.say("transfer cipher enabled").await;
            }
            None => self.say("usage: key <passphrase>").await,
        }
    }
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("env", &self.env)
            .field("listening", &self.host.is_some())
            .finish()
    }
}
