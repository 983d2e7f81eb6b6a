//! Stream adapter between the remote shell and the session queues.
//!
//! The remote shell speaks bytes; the rest of the console speaks lines on
//! queues. This module bridges the two:
//!
//! - [`InboundReader`]: the shell's input. Yields queued command lines as
//!   bytes, each terminated by exactly one newline.
//! - [`OutputWriter`]: the shell's output. Splits arbitrary byte chunks into
//!   lines, classifies each line and republishes it on the outbound queue.
//!
//! The inbound queue is unbounded and closed through a cancellation token
//! owned by the session. The outbound queue is bounded; producers wait when
//! it is full, so no line is ever dropped.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::classifier::{CHECK_SUCCESS_NOTICE, SessionFlags};
use super::error::ConsoleError;

/// Default capacity of the outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 100;

/// A message on the outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// A line for the client.
    Line(String),
    /// Stop the outbound pump.
    Close,
}

/// Producer side of the outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<OutboundMessage>,
}

/// Consumer side of the outbound queue.
pub type OutboundReceiver = mpsc::Receiver<OutboundMessage>;

/// Create the outbound queue with the given capacity.
pub fn outbound_queue(capacity: usize) -> (Outbox, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Outbox { tx }, rx)
}

impl Outbox {
    /// Publish a line for the client.
    ///
    /// A closed queue means the pump already stopped; the line is discarded.
    pub async fn publish(&self, line: impl Into<String>) {
        if self
            .tx
            .send(OutboundMessage::Line(line.into()))
            .await
            .is_err()
        {
            debug!("Outbound queue closed, dropping line");
        }
    }

    /// Deliver the close sentinel. Tolerates a pump that already stopped.
    pub async fn close(&self) {
        let _ = self.tx.send(OutboundMessage::Close).await;
    }
}

/// Create the inbound queue.
pub fn inbound_queue() -> (InboundSender, InboundReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();
    let sender = InboundSender {
        tx,
        closed: closed.clone(),
    };
    let reader = InboundReader {
        rx: Arc::new(Mutex::new(rx)),
        closed,
        pending: Vec::new(),
    };
    (sender, reader)
}

/// Producer side of the inbound queue.
#[derive(Debug)]
pub struct InboundSender {
    tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
}

impl InboundSender {
    /// Queue a line for the remote shell.
    ///
    /// Fails with [`ConsoleError::InputClosed`] once the queue was closed or
    /// the reading side is gone.
    pub fn send(&self, line: impl Into<String>) -> Result<(), ConsoleError> {
        if self.closed.is_cancelled() {
            return Err(ConsoleError::InputClosed);
        }
        self.tx
            .send(line.into())
            .map_err(|_| ConsoleError::InputClosed)
    }

    /// Close the queue. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        self.closed.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Result of a single read from the inbound side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the buffer.
    Data(usize),
    /// An empty line was received; nothing to send, but not end of stream.
    Idle,
    /// The queue is closed and drained.
    Eof,
}

/// Consumer side of the inbound queue, shaped like a byte stream.
///
/// Clones share the same queue, which lets keyboard-interactive
/// authentication read answers before the shell takes over the reader.
#[derive(Debug)]
pub struct InboundReader {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    closed: CancellationToken,
    pending: Vec<u8>,
}

impl Clone for InboundReader {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            closed: self.closed.clone(),
            pending: Vec::new(),
        }
    }
}

impl InboundReader {
    /// Wait for the next raw line. `None` once the queue is closed and empty.
    pub async fn next_line(&self) -> Option<String> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            line = rx.recv() => line,
            _ = self.closed.cancelled() => rx.try_recv().ok(),
        }
    }

    /// Drop every line queued so far. Returns how many were dropped.
    pub async fn discard_queued(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Read the next chunk of input into `buf`.
    ///
    /// Lines longer than `buf` are carried over to subsequent reads.
    pub async fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        if buf.is_empty() {
            return ReadOutcome::Idle;
        }

        if self.pending.is_empty() {
            let Some(line) = self.next_line().await else {
                return ReadOutcome::Eof;
            };
            if line.is_empty() {
                return ReadOutcome::Idle;
            }
            self.pending = line.into_bytes();
            if !self.pending.contains(&b'\n') {
                self.pending.push(b'\n');
            }
        }

        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        ReadOutcome::Data(n)
    }
}

/// Splits a byte stream into lines, holding the unterminated tail.
///
/// Lines are decoded lossily and lose their `\n` and any trailing `\r`.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            partial: Vec::with_capacity(256),
        }
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            lines.push(line.strip_suffix('\r').unwrap_or(&*line).to_string());
        }
        lines
    }

    /// The unterminated tail, if any.
    pub fn pending(&self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&self.partial).into_owned())
    }

    /// Take the unterminated tail, leaving the buffer empty.
    pub fn take_rest(&mut self) -> Option<String> {
        let rest = self.pending();
        self.partial.clear();
        rest
    }
}

/// Whether an unterminated fragment looks like an interactive prompt.
fn is_prompt_fragment(fragment: &str) -> bool {
    matches!(
        fragment.trim_end_matches(' ').chars().last(),
        Some('$' | '#' | '>' | ':')
    )
}

/// Output side of the remote shell.
///
/// Owns the partial-line buffer: only complete lines are classified for
/// health and republished, each exactly once. An unterminated tail that
/// looks like a prompt updates the login state right away but stays
/// buffered until its newline (or [`OutputWriter::finish`]) arrives.
#[derive(Debug)]
pub struct OutputWriter {
    flags: Arc<SessionFlags>,
    outbox: Outbox,
    lines: LineBuffer,
}

impl OutputWriter {
    pub fn new(flags: Arc<SessionFlags>, outbox: Outbox) -> Self {
        Self {
            flags,
            outbox,
            lines: LineBuffer::new(),
        }
    }

    /// Consume a chunk of remote output. Never fails; returns the chunk length.
    pub async fn write(&mut self, chunk: &[u8]) -> usize {
        if chunk.is_empty() {
            return 0;
        }

        for line in self.lines.push(chunk) {
            self.emit(line).await;
        }

        if let Some(fragment) = self.lines.pending()
            && is_prompt_fragment(&fragment)
            && self.flags.observe_prompt(&fragment)
        {
            debug!("Prompt moved login state to {}", self.flags.login_state());
        }

        chunk.len()
    }

    /// Flush any unterminated fragment. Called when the remote stream ends.
    pub async fn finish(&mut self) {
        if let Some(fragment) = self.lines.take_rest() {
            self.emit(fragment).await;
        }
    }

    async fn emit(&self, line: String) {
        let observation = self.flags.observe(&line);
        if observation.health_confirmed {
            self.outbox.publish(CHECK_SUCCESS_NOTICE).await;
        }
        self.outbox.publish(line).await;
    }
}
