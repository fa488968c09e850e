//! Response sinks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::types::Response;

/// Receives interim responses of streamed exchanges, or final responses
/// when installed as the response logger.
///
/// Errors are logged by the caller and never fail the exchange.
#[async_trait]
pub trait LogStream: Send + Sync {
    async fn log(&self, label: &str, response: &Response) -> Result<()>;
}

/// Logs responses through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogStream;

#[async_trait]
impl LogStream for TracingLogStream {
    async fn log(&self, label: &str, response: &Response) -> Result<()> {
        tracing::info!(
            target: "regionflow::orchestrator",
            label,
            protocol = %response.protocol,
            status = response.status_code,
            total_ms = response.timings.total,
            "{}",
            response.name.as_deref().unwrap_or(label)
        );
        Ok(())
    }
}

/// Interim log calls launched while a stream is read.
///
/// Calls reach the sink in the order they were made, one at a time, on a
/// worker task started by the first call; [`join_all`](Self::join_all)
/// must be awaited before the exchange resolves.
pub struct PendingLogs {
    sink: Option<Arc<dyn LogStream>>,
    worker: Option<(mpsc::UnboundedSender<(String, Response)>, JoinHandle<()>)>,
    launched: usize,
}

impl PendingLogs {
    /// `None` disables interim logging.
    pub fn new(sink: Option<Arc<dyn LogStream>>) -> Self {
        Self {
            sink,
            worker: None,
            launched: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn log(&mut self, label: String, response: Response) {
        let Some(sink) = &self.sink else {
            return;
        };
        let (queue, _) = self.worker.get_or_insert_with(|| {
            let (queue, mut calls) = mpsc::unbounded_channel::<(String, Response)>();
            let sink = sink.clone();
            let worker = tokio::spawn(async move {
                while let Some((label, response)) = calls.recv().await {
                    if let Err(err) = sink.log(&label, &response).await {
                        tracing::warn!(target: "regionflow::orchestrator", %label, error = %err, "log stream failed");
                    }
                }
            });
            (queue, worker)
        });
        // the worker only stops once the queue is dropped
        let _ = queue.send((label, response));
        self.launched += 1;
    }

    pub fn len(&self) -> usize {
        self.launched
    }

    pub fn is_empty(&self) -> bool {
        self.launched == 0
    }

    pub async fn join_all(self) {
        let Some((queue, worker)) = self.worker else {
            return;
        };
        drop(queue);
        if let Err(err) = worker.await {
            tracing::warn!(target: "regionflow::orchestrator", error = %err, "log stream task aborted");
        }
    }
}

/// Hand a final response to `sink`, logging instead of failing.
pub async fn log_best_effort(sink: &dyn LogStream, label: &str, response: &Response) {
    if let Err(err) = sink.log(label, response).await {
        tracing::warn!(target: "regionflow::orchestrator", %label, error = %err, "response logger failed");
    }
}
