//! Remote shell abstraction.
//!
//! A [`RemoteShell`] is the one capability the console needs from a jump
//! host: run an interactive shell fed from an [`InboundReader`] and printing
//! into an [`OutputWriter`], plus uploading files next to it. A
//! [`CommandExecutor`] is the narrower capability used when a script runs
//! straight against a server: one exec channel per command. The russh
//! implementation of both lives in [`crate::console::client::JumpHost`];
//! tests use scripted fakes.

use std::path::Path;

use async_trait::async_trait;
use russh::Pty;

use super::adapter::{InboundReader, Outbox, OutputWriter};
use super::error::ConsoleError;

/// Terminal type requested for the PTY.
pub const PTY_TERM: &str = "xterm";

/// PTY width in columns.
pub const PTY_COLUMNS: u32 = 200;

/// PTY height in rows.
pub const PTY_ROWS: u32 = 100;

/// Terminal I/O speed reported to the remote side.
pub const PTY_BAUD: u32 = 14400;

/// An interactive shell on a remote host.
///
/// Implementations must be thread-safe (`Send + Sync`): the shell task runs
/// [`RemoteShell::run`] while scripts call [`RemoteShell::upload`] and
/// teardown calls [`RemoteShell::close`] from other tasks.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run the interactive shell until the remote side exits or the input
    /// reaches end of stream.
    async fn run(&self, input: InboundReader, output: OutputWriter) -> Result<(), ConsoleError>;

    /// Copy a local file or directory to a remote path.
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), ConsoleError>;

    /// Close the underlying connection.
    async fn close(&self) -> Result<(), ConsoleError>;

    /// Short description for logs, e.g. `user@host:port`.
    fn describe(&self) -> String;
}

/// Runs single commands on a server without an interactive shell.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` to completion, publishing its stdout and stderr lines on
    /// `outbox`. Returns the exit status when the server reports one.
    async fn exec(&self, command: &str, outbox: &Outbox) -> Result<Option<u32>, ConsoleError>;

    async fn close(&self) -> Result<(), ConsoleError>;

    fn describe(&self) -> String;
}

/// PTY settings requested for interactive shells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyConfig {
    pub term: String,
    pub columns: u32,
    pub rows: u32,
    /// Value for the `LANG` environment variable on the remote side.
    pub lang: String,
}

impl PtyConfig {
    pub fn new(lang: impl Into<String>) -> Self {
        Self {
            term: PTY_TERM.to_string(),
            columns: PTY_COLUMNS,
            rows: PTY_ROWS,
            lang: lang.into(),
        }
    }

    /// Terminal modes: no local echo, fixed line speed.
    ///
    /// Echo is disabled so typed commands are not mirrored back into the
    /// output and re-classified.
    pub fn terminal_modes(&self) -> [(Pty, u32); 3] {
        [
            (Pty::ECHO, 0),
            (Pty::TTY_OP_ISPEED, PTY_BAUD),
            (Pty::TTY_OP_OSPEED, PTY_BAUD),
        ]
    }
}
