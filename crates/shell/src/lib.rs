//! # Ferrysh Shell Library
//!
//! This crate implements the ferrysh interactive file-management shell and
//! its remote session machinery.
//!
//! ## Overview
//!
//! A ferrysh process is an ordinary interactive shell until it is told to
//! expose itself: `host <port>` accepts one peer and redirects the command
//! loop to the socket, so the peer drives local command execution;
//! `connect <host> <port>` is the other side of that arrangement. While a
//! session is up, the same connection can switch into binary mode to move
//! files or whole directory trees either way, optionally encrypted, then
//! drops back to the text protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Command Loop (Shell)                 │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌───────────────┐  ┌──────────────┐  ┌──────────────┐   │
//! │  │  SessionHost  │  │ SessionClient│  │   Transfer   │   │
//! │  │  (accept/bind)│  │ (dual loops) │  │    Engine    │   │
//! │  └───────────────┘  └──────────────┘  └──────────────┘   │
//! │                                                          │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │   Connection (swappable endpoints, cipher, marks)  │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration loading and validation
//! - [`connection`]: swappable stream endpoints, cipher, download marks
//! - [`env`]: the shell environment (cwd + connection)
//! - [`marks`]: the download mark registry
//! - [`session`]: hosting and driving remote sessions
//! - [`shell`]: the interactive command loop
//! - [`transfer`]: the file/tree transfer engine
//! - [`error`]: error types

pub mod config;
pub mod connection;
pub mod env;
pub mod error;
pub mod marks;
pub mod session;
pub mod shell;
pub mod transfer;

// Re-export protocol for convenience
pub use protocol;

// Re-export the main types for convenience
pub use config::{Config, ConfigError};
pub use connection::{Connection, InputEndpoint, OutputEndpoint};
pub use env::ShellEnv;
pub use error::{Result, ShellError};
pub use marks::MarkRegistry;
pub use session::{PromptRelay, SessionClient, SessionHost};
pub use shell::{LoopAction, Shell};
pub use transfer::{
    receive_transfer, send_path, PendingCollision, ReceiveOutcome, SendSummary, TransferOptions,
};
