//! The shell environment: working directory plus the active connection.
//!
//! Command handlers talk to the outside world only through this type, so
//! their output follows the connection wherever it currently points:
//! console when local, socket while a session is active.

use std::io;
use std::path::{Path, PathBuf};

use crate::connection::Connection;

/// Shared state every command handler works against.
#[derive(Debug)]
pub struct ShellEnv {
    cwd: PathBuf,
    conn: Connection,
}

impl ShellEnv {
    /// Create an environment rooted at the given working directory.
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            conn: Connection::new(),
        }
    }

    /// Write text to the active output endpoint, without a newline.
    pub async fn write(&mut self, text: &str) -> io::Result<()> {
        self.conn.output_mut().write_str(text).await
    }

    /// Write a line to the active output endpoint.
    pub async fn writeln(&mut self, text: &str) -> io::Result<()> {
        self.conn.output_mut().write_line(text).await
    }

    /// Read a line from the active input endpoint; `None` on end of stream.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.conn.input_mut().read_line().await
    }

    /// The current working directory.
    pub fn current_path(&self) -> &Path {
        &self.cwd
    }

    /// Change the current working directory.
    pub fn set_current_path(&mut self, path: PathBuf) {
        self.cwd = path;
    }

    /// Resolve a possibly-relative path against the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.cwd.join(candidate)
        }
    }

    /// The active connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// The active connection, mutably.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_path() {
        let env = ShellEnv::new(PathBuf::from("/home/user"));
        assert_eq!(env.resolve("notes.txt"), PathBuf::from("/home/user/notes.txt"));
        assert_eq!(env.resolve("a/b"), PathBuf::from("/home/user/a/b"));
    }

    #[test]
    fn test_resolve_absolute_path() {
        let env = ShellEnv::new(PathBuf::from("/home/user"));
        assert_eq!(env.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_set_current_path() {
        let mut env = ShellEnv::new(PathBuf::from("/home/user"));
        env.set_current_path(PathBuf::from("/tmp"));
        assert_eq!(env.current_path(), Path::new("/tmp"));
        assert_eq!(env.resolve("x"), PathBuf::from("/tmp/x"));
    }
}
