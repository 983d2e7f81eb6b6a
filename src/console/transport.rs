//! Client transport abstraction.
//!
//! The console only ever pushes named events to its client. Every line,
//! whether remote shell output or a notice from a script, travels as a
//! [`CHAT_EVENT`].
//!
//! - [`ChannelSink`]: forwards events into an mpsc channel drained by a
//!   websocket writer task.
//! - [`BufferedSink`]: keeps the most recent lines in memory so MCP callers
//!   can poll them with `console_read`.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};

use super::error::ConsoleError;

/// Event name carrying both shell output and script notices.
pub const CHAT_EVENT: &str = "chat";

/// Maximum number of lines retained by a [`BufferedSink`].
pub const MAX_BUFFERED_LINES: usize = 10_000;

/// A named event pushed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event: String,
    pub data: String,
}

/// Outbound side of a client connection.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emit one event. An error means the client is gone.
    async fn emit(&self, event: &str, payload: &str) -> Result<(), ConsoleError>;
}

/// Sink that forwards events into a channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: &str, payload: &str) -> Result<(), ConsoleError> {
        self.tx
            .send(ServerEvent {
                event: event.to_string(),
                data: payload.to_string(),
            })
            .map_err(|_| ConsoleError::Transport("client channel closed".to_string()))
    }
}

/// Sink that buffers lines for polling.
///
/// Oldest lines are discarded once [`MAX_BUFFERED_LINES`] is exceeded.
pub struct BufferedSink {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::with_capacity(MAX_BUFFERED_LINES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Remove and return up to `max` buffered lines, oldest first.
    pub async fn drain(&self, max: usize) -> Vec<String> {
        let mut lines = self.lines.lock().await;
        let n = max.min(lines.len());
        lines.drain(..n).collect()
    }

    pub async fn len(&self) -> usize {
        self.lines.lock().await.len()
    }
}

impl Default for BufferedSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for BufferedSink {
    async fn emit(&self, _event: &str, payload: &str) -> Result<(), ConsoleError> {
        let mut lines = self.lines.lock().await;
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(payload.to_string());
        Ok(())
    }
}
