//! Error types for the console bridge.
//!
//! Errors are grouped by where they stop:
//!
//! 1. **Transport failures** (`Connect`, `Auth`, `Channel`): fatal to session
//!    creation, reported to the caller, never retried.
//! 2. **Mid-session write failures** (`InputClosed`, `NoRemoteShell`): the
//!    shell is gone or was never attached. Callers recover locally; a script
//!    treats them as the outcome of the directive that hit them.
//! 3. **Malformed script tokens**: see [`crate::console::script::ScriptError`].
//!
//! Nothing here is ever surfaced to a client except as a chat line.

use thiserror::Error;

/// Errors produced by sessions, the remote shell and the client transport.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// TCP connection or SSH handshake to the jump host failed.
    #[error("Failed to connect to jump host: {0}")]
    Connect(String),

    /// All authentication strategies were rejected.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Opening or driving the shell channel failed.
    #[error("Shell channel error: {0}")]
    Channel(String),

    /// The session's input queue is closed; the remote shell has terminated.
    #[error("Session input is closed, remote shell has terminated")]
    InputClosed,

    /// The session has no remote shell attached.
    #[error("Session has no remote shell attached")]
    NoRemoteShell,

    /// A remote shell was already attached to this session.
    #[error("Session already has a remote shell attached")]
    AlreadyAttached,

    /// File upload failed.
    #[error("Upload failed: {0}")]
    Upload(String),

    /// The client transport rejected an outbound event.
    #[error("Client transport closed: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<russh::Error> for ConsoleError {
    fn from(e: russh::Error) -> Self {
        ConsoleError::Channel(e.to_string())
    }
}
