//! Console session state.
//!
//! A [`Session`] is one active remote console bound to one client
//! connection. It owns:
//!
//! - the remote shell handle (attached at most once),
//! - the inbound queue (commands and keystrokes for the shell),
//! - the outbound queue (lines for the client),
//! - the classifier flags (login state, health state, check counter),
//! - the current health-check target.
//!
//! # Lifecycle
//!
//! A session is created when a client opens a console, before any remote
//! connection exists, so authentication prompts can already flow through its
//! queues. It is torn down when the remote shell exits, when the client
//! disconnects, or on explicit close. [`Session::teardown`] closes the
//! inbound queue, the outbound queue and the remote handle exactly once,
//! whichever side gets there first.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::adapter::{
    InboundReader, InboundSender, OutboundReceiver, Outbox, OutputWriter, inbound_queue,
    outbound_queue,
};
use super::classifier::{HealthState, LoginState, SessionFlags};
use super::error::ConsoleError;
use super::health::HealthTarget;
use super::pump;
use super::shell::RemoteShell;

/// One console: a remote shell bridged to a client.
pub struct Session {
    id: String,
    created_at: String,
    remote: OnceCell<Arc<dyn RemoteShell>>,
    inbound: InboundSender,
    reader: InboundReader,
    outbox: Outbox,
    flags: Arc<SessionFlags>,
    health_target: Mutex<Option<HealthTarget>>,
    shutdown: CancellationToken,
    torn_down: AtomicBool,
}

impl Session {
    /// Create a session with a fresh id and its queues.
    ///
    /// The returned receiver is the consumer side of the outbound queue; hand
    /// it to [`pump::spawn_outbound`].
    pub fn new(outbound_capacity: usize) -> (Arc<Self>, OutboundReceiver) {
        Self::with_id(Uuid::new_v4().to_string(), outbound_capacity)
    }

    pub fn with_id(id: impl Into<String>, outbound_capacity: usize) -> (Arc<Self>, OutboundReceiver) {
        let (inbound, reader) = inbound_queue();
        let (outbox, outbound_rx) = outbound_queue(outbound_capacity);
        let session = Arc::new(Self {
            id: id.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
            remote: OnceCell::new(),
            inbound,
            reader,
            outbox,
            flags: Arc::new(SessionFlags::new()),
            health_target: Mutex::new(None),
            shutdown: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
        });
        (session, outbound_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub fn flags(&self) -> &Arc<SessionFlags> {
        &self.flags
    }

    pub fn login_state(&self) -> LoginState {
        self.flags.login_state()
    }

    pub fn health_state(&self) -> HealthState {
        self.flags.health_state()
    }

    pub fn check_count(&self) -> u32 {
        self.flags.check_count()
    }

    /// Producer handle for the outbound queue.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Publish a line to the client.
    pub async fn publish(&self, line: impl Into<String>) {
        self.outbox.publish(line).await;
    }

    /// A reader sharing this session's inbound queue.
    pub fn reader(&self) -> InboundReader {
        self.reader.clone()
    }

    /// A writer classifying into this session's flags and outbound queue.
    pub fn writer(&self) -> OutputWriter {
        OutputWriter::new(self.flags.clone(), self.outbox.clone())
    }

    /// Token cancelled when the session is torn down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.get().is_some()
    }

    /// The attached remote shell.
    pub fn remote(&self) -> Result<Arc<dyn RemoteShell>, ConsoleError> {
        self.remote.get().cloned().ok_or(ConsoleError::NoRemoteShell)
    }

    /// Describe the attached remote, if any.
    pub fn remote_description(&self) -> Option<String> {
        self.remote.get().map(|remote| remote.describe())
    }

    /// Attach the remote shell and start the shell task.
    pub fn attach(
        self: &Arc<Self>,
        remote: Arc<dyn RemoteShell>,
    ) -> Result<JoinHandle<()>, ConsoleError> {
        if self.is_closed() {
            return Err(ConsoleError::InputClosed);
        }
        self.remote
            .set(remote.clone())
            .map_err(|_| ConsoleError::AlreadyAttached)?;
        info!("Session {} attached to {}", self.id, remote.describe());
        Ok(pump::spawn_shell(self.clone(), remote))
    }

    /// Send one command to the remote shell.
    ///
    /// Fails without panicking when no shell is attached or the shell has
    /// already terminated.
    pub fn send_command(&self, command: &str) -> Result<(), ConsoleError> {
        if self.remote.get().is_none() {
            return Err(ConsoleError::NoRemoteShell);
        }
        self.inbound.send(command)?;
        info!("Session {} sent command: {}", self.id, command);
        Ok(())
    }

    /// Queue a line typed by the client (keystrokes or MFA answers).
    ///
    /// Unlike [`Session::send_command`], this works before a remote shell is
    /// attached, so authentication prompts can be answered.
    pub fn submit_input(&self, line: &str) -> Result<(), ConsoleError> {
        self.inbound.send(line)
    }

    /// Upload a local path through the attached remote.
    pub async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), ConsoleError> {
        let remote = self.remote()?;
        remote.upload(local, remote_path).await
    }

    pub(crate) fn health_target(&self) -> &Mutex<Option<HealthTarget>> {
        &self.health_target
    }

    /// Close the queues and the remote handle.
    ///
    /// Idempotent: only the first call does anything.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Tearing down session {}", self.id);

        self.shutdown.cancel();
        self.inbound.close();
        self.outbox.close().await;

        if let Some(remote) = self.remote.get()
            && let Err(e) = remote.close().await
        {
            warn!("Error closing remote for session {}: {}", self.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::adapter::OutboundMessage;

    #[tokio::test]
    async fn test_new_session_defaults() {
        let (session, _rx) = Session::new(8);
        assert!(Uuid::parse_str(session.id()).is_ok());
        assert_eq!(session.login_state(), LoginState::Menu);
        assert_eq!(session.health_state(), HealthState::Idle);
        assert!(!session.has_remote());
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_send_command_without_remote_fails() {
        let (session, _rx) = Session::new(8);
        assert!(matches!(
            session.send_command("ls"),
            Err(ConsoleError::NoRemoteShell)
        ));
    }

    #[tokio::test]
    async fn test_submit_input_without_remote_succeeds() {
        let (session, _rx) = Session::new(8);
        session.submit_input("123456").unwrap();
        assert_eq!(session.reader().next_line().await.as_deref(), Some("123456"));
    }

    #[tokio::test]
    async fn test_upload_without_remote_fails() {
        let (session, _rx) = Session::new(8);
        let result = session.upload(Path::new("/tmp/a"), "/tmp/b").await;
        assert!(matches!(result, Err(ConsoleError::NoRemoteShell)));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (session, mut rx) = Session::new(8);
        session.teardown().await;
        session.teardown().await;

        assert!(session.is_closed());
        assert!(session.shutdown_token().is_cancelled());
        assert_eq!(rx.recv().await, Some(OutboundMessage::Close));
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            session.submit_input("x"),
            Err(ConsoleError::InputClosed)
        ));
    }

    #[tokio::test]
    async fn test_teardown_tolerates_closed_outbound() {
        let (session, rx) = Session::new(8);
        drop(rx);
        session.teardown().await;
        assert!(session.is_closed());
    }
}
