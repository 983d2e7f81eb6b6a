//! Background tasks bridging a session to its remote shell and its client.
//!
//! Each console runs two tasks:
//!
//! - the **outbound pump**, which forwards outbound lines to the client
//!   transport one at a time, in FIFO order, until the queue closes or the
//!   close sentinel arrives;
//! - the **shell task**, which runs the remote shell to completion and then
//!   tears the session down.
//!
//! Scripts run on their caller's task and are not managed here.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::adapter::{OutboundMessage, OutboundReceiver};
use super::session::Session;
use super::shell::RemoteShell;
use super::transport::{CHAT_EVENT, EventSink};

/// Spawn the outbound pump for a session.
///
/// Returns the number of lines delivered when the pump stops.
pub fn spawn_outbound(
    session_id: String,
    mut rx: OutboundReceiver,
    sink: Arc<dyn EventSink>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut delivered = 0usize;
        loop {
            match rx.recv().await {
                Some(OutboundMessage::Line(line)) => {
                    if let Err(e) = sink.emit(CHAT_EVENT, &line).await {
                        warn!("Session {} client went away: {}", session_id, e);
                        break;
                    }
                    delivered += 1;
                }
                Some(OutboundMessage::Close) | None => break,
            }
        }
        info!(
            "Outbound pump for session {} stopped after {} line(s)",
            session_id, delivered
        );
        delivered
    })
}

/// Spawn the shell task for a session.
///
/// When the remote shell returns, for any reason, the session is torn down.
pub fn spawn_shell(session: Arc<Session>, remote: Arc<dyn RemoteShell>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let input = session.reader();
        let output = session.writer();

        match remote.run(input, output).await {
            Ok(()) => info!("Remote shell for session {} finished", session.id()),
            Err(e) => error!("Remote shell for session {} failed: {}", session.id(), e),
        }

        session.teardown().await;
    })
}
