//! Streaming machinery shared by the streamed protocol handlers.
//!
//! A transport pushes chunks into a [`ChunkSink`]; a collector task drains
//! them, keeps the [`StreamingSession`] counters current, launches interim
//! log calls and stops on the first `end`/`close` or when asked to. The
//! accumulated chunks are then reduced into one response.

pub mod log;
pub mod reducer;
pub mod resolve;
pub mod session;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::Headers;

pub use log::{LogStream, PendingLogs, TracingLogStream, log_best_effort};
pub use reducer::{
    ERROR_EVENT, ResponseTemplate, StreamChunk, StreamFailure, reduce_keyed, reduce_list,
};
pub use resolve::{ChunkEvent, ChunkSink, ResolveOnce, StreamEnd, chunk_channel};
pub use session::{StreamSignals, StreamingSession};

/// Result of draining a chunk channel.
pub struct Collected {
    pub metadata: Headers,
    pub chunks: Vec<StreamChunk>,
    /// `None` when collection was stopped before the stream finished.
    pub end: Option<StreamEnd>,
    pub logs: PendingLogs,
}

/// Drain `events` until the stream finishes or `stop` fires.
///
/// When `logs` is enabled every chunk is surfaced under `label` as an
/// interim response named `"{template name} ({n})"`.
pub async fn collect_chunks(
    mut events: mpsc::UnboundedReceiver<ChunkEvent>,
    stop: CancellationToken,
    signals: StreamSignals,
    mut logs: PendingLogs,
    template: ResponseTemplate,
    label: String,
) -> Collected {
    let prefix = template.name.clone().unwrap_or_else(|| label.clone());
    let mut metadata = Headers::new();
    let mut chunks = Vec::new();
    let mut end = None;
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(ChunkEvent::Metadata(headers)) => metadata = headers,
            Some(ChunkEvent::Chunk(chunk)) => {
                if matches!(chunk, StreamChunk::Data(_)) {
                    signals.message_received();
                }
                if logs.is_enabled() {
                    let name = format!("{prefix} ({})", chunks.len() + 1);
                    let mut interim = template.interim(name, &chunk);
                    interim.headers = metadata.clone();
                    logs.log(label.clone(), interim);
                }
                chunks.push(chunk);
            }
            Some(ChunkEvent::Finished(how)) => {
                end = Some(how);
                break;
            }
            // every sink dropped without finishing
            None => {
                end = Some(StreamEnd::Close);
                break;
            }
        }
    }
    signals.close();
    Collected {
        metadata,
        chunks,
        end,
        logs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::types::{Protocol, Response};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Names(Mutex<Vec<String>>);

    #[async_trait]
    impl LogStream for Names {
        async fn log(&self, label: &str, response: &Response) -> Result<()> {
            let name = response.name.clone().unwrap_or_default();
            self.0.lock().unwrap().push(format!("{label}: {name}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn collects_until_first_finish_and_logs_each_chunk_once() {
        let (sink, events) = chunk_channel();
        let (signals, session) = StreamSignals::new();
        let names = Arc::new(Names::default());
        let template =
            ResponseTemplate::new(Protocol::Grpc, "application/grpc+json").with_name("GRPC x");

        sink.metadata(Headers::new().with("x-trace", "1"));
        sink.data(json!("a"));
        sink.error(StreamFailure::new("late").with_code(2));
        sink.end();
        sink.close();

        let collected = collect_chunks(
            events,
            CancellationToken::new(),
            signals,
            PendingLogs::new(Some(names.clone() as Arc<dyn LogStream>)),
            template,
            "/Greeter/SayHello".to_string(),
        )
        .await;
        collected.logs.join_all().await;

        assert_eq!(collected.end, Some(StreamEnd::End));
        assert_eq!(collected.chunks.len(), 2);
        assert_eq!(collected.metadata.get_str("x-trace").as_deref(), Some("1"));
        assert_eq!(session.received(), 1);
        assert!(session.is_closed());
        assert_eq!(
            *names.0.lock().unwrap(),
            ["/Greeter/SayHello: GRPC x (1)", "/Greeter/SayHello: GRPC x (2)"]
        );
    }

    #[tokio::test]
    async fn stop_token_ends_collection() {
        let (_sink, events) = chunk_channel();
        let (signals, _session) = StreamSignals::new();
        let stop = CancellationToken::new();
        stop.cancel();
        let collected = collect_chunks(
            events,
            stop,
            signals,
            PendingLogs::new(None),
            ResponseTemplate::new(Protocol::Amqp, "application/json"),
            "AMQP".to_string(),
        )
        .await;
        assert_eq!(collected.end, None);
        assert!(collected.chunks.is_empty());
    }
}
