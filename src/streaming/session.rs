//! Live view of a stream while `on_streaming` hooks decide when to stop.

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::error::{Result, SendError};

/// Producer side, owned by the task reading the stream.
#[derive(Debug)]
pub struct StreamSignals {
    received: watch::Sender<usize>,
    closed: watch::Sender<bool>,
}

impl StreamSignals {
    pub fn new() -> (Self, StreamingSession) {
        let (received, received_rx) = watch::channel(0);
        let (closed, closed_rx) = watch::channel(false);
        (
            Self { received, closed },
            StreamingSession {
                received: received_rx,
                closed: closed_rx,
                writer: None,
            },
        )
    }

    pub fn message_received(&self) {
        self.received.send_modify(|count| *count += 1);
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }
}

impl Drop for StreamSignals {
    fn drop(&mut self) {
        self.close();
    }
}

/// What `on_streaming` hooks see through `context.streaming`.
///
/// For request-streaming calls the session also owns the write side;
/// the writes end once the session is dropped.
#[derive(Debug)]
pub struct StreamingSession {
    received: watch::Receiver<usize>,
    closed: watch::Receiver<bool>,
    writer: Option<mpsc::UnboundedSender<Value>>,
}

impl StreamingSession {
    pub fn with_writer(mut self, writer: mpsc::UnboundedSender<Value>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Messages received so far.
    pub fn received(&self) -> usize {
        *self.received.borrow()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until `count` messages arrived. Returns `false` when the stream
    /// closed first.
    pub async fn wait_for_messages(&self, count: usize) -> bool {
        let mut received = self.received.clone();
        let mut closed = self.closed.clone();
        tokio::select! {
            reached = received.wait_for(|n| *n >= count) => reached.is_ok(),
            _ = closed.wait_for(|c| *c) => self.received() >= count,
        }
    }

    /// Wait until the stream closes.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        // a dropped producer counts as closed
        let _ = closed.wait_for(|c| *c).await;
    }

    pub fn can_write(&self) -> bool {
        self.writer.as_ref().is_some_and(|w| !w.is_closed())
    }

    /// Write one message on the request stream.
    pub fn write(&self, message: Value) -> Result<()> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| SendError::StreamError("stream does not accept writes".to_string()))?;
        writer
            .send(message)
            .map_err(|_| SendError::StreamError("request stream already ended".to_string()))
    }

    /// End the request stream early.
    pub fn end_writes(&mut self) {
        self.writer = None;
    }
}
