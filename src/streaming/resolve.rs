//! Exactly-once resolution of streamed exchanges.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

use super::reducer::{StreamChunk, StreamFailure};
use crate::types::Headers;

/// A flag that can be won exactly once.
#[derive(Debug, Default)]
pub struct ResolveOnce {
    resolved: AtomicBool,
}

impl ResolveOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the first caller only.
    pub fn resolve(&self) -> bool {
        !self.resolved.swap(true, Ordering::AcqRel)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }
}

/// How a stream finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The remote completed the stream.
    End,
    /// The stream was closed, possibly early.
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent {
    /// Response metadata (headers, initial RPC metadata).
    Metadata(Headers),
    Chunk(StreamChunk),
    Finished(StreamEnd),
}

/// Event listener side handed to transports.
///
/// `end` and `close` may both fire, in any order and from any task; only
/// the first one is forwarded and everything after it is dropped.
#[derive(Debug, Clone)]
pub struct ChunkSink {
    tx: mpsc::UnboundedSender<ChunkEvent>,
    resolved: Arc<ResolveOnce>,
}

impl ChunkSink {
    pub fn metadata(&self, headers: Headers) {
        self.push(ChunkEvent::Metadata(headers));
    }

    pub fn data(&self, value: Value) {
        self.push(ChunkEvent::Chunk(StreamChunk::Data(value)));
    }

    pub fn error(&self, failure: StreamFailure) {
        self.push(ChunkEvent::Chunk(StreamChunk::Error(failure)));
    }

    pub fn end(&self) {
        self.finish(StreamEnd::End);
    }

    pub fn close(&self) {
        self.finish(StreamEnd::Close);
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_resolved()
    }

    fn push(&self, event: ChunkEvent) {
        if !self.resolved.is_resolved() {
            // receiver gone means the exchange is already over
            let _ = self.tx.send(event);
        }
    }

    fn finish(&self, how: StreamEnd) {
        if self.resolved.resolve() {
            let _ = self.tx.send(ChunkEvent::Finished(how));
        }
    }
}

/// Create a sink and the receiver the handler consumes.
pub fn chunk_channel() -> (ChunkSink, mpsc::UnboundedReceiver<ChunkEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChunkSink {
            tx,
            resolved: Arc::new(ResolveOnce::new()),
        },
        rx,
    )
}
