//! Remote sessions: hosting and driving.
//!
//! A host redirects its shell's I/O to an accepted socket so the peer
//! drives command execution; a client runs concurrent reader/writer loops
//! against the dialed socket. Both reuse the same transfer engine for the
//! binary mode.

pub mod client;
pub mod host;

pub use client::{forward_local_input, forward_remote_output, PromptRelay, SessionClient};
pub use host::SessionHost;
