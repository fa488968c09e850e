//! AMQP handler
//!
//! `publish` is a single exchange: the broker receipt becomes the response
//! body. `consume` streams deliveries until the `on_streaming` hooks resolve
//! (or the broker closes the channel) and folds them with the list reducer.
//! Without hooks the consumer stops right away.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::ProtocolHandler;
use super::envelope::{after_response, before_request};
use crate::error::{Result, SendError};
use crate::processor::ProcessorContext;
use crate::streaming::{
    ChunkSink, PendingLogs, ResponseTemplate, StreamChunk, StreamFailure, StreamSignals,
    chunk_channel, collect_chunks, reduce_list,
};
use crate::types::{AmqpMethod, AmqpRequest, Protocol, Request, Response, Timings};
use crate::utils::elapsed_ms;

/// Broker client supplied by the embedding application.
#[async_trait]
pub trait AmqpTransport: Send + Sync {
    /// Publish one message and return the broker receipt.
    async fn publish(
        &self,
        request: &AmqpRequest,
        payload: Bytes,
        cancel: CancellationToken,
    ) -> std::result::Result<Value, StreamFailure>;

    /// Push deliveries into `sink` until `cancel` fires or the channel closes.
    async fn consume(
        &self,
        request: AmqpRequest,
        sink: ChunkSink,
        cancel: CancellationToken,
    ) -> std::result::Result<(), StreamFailure>;
}

/// Handles [`AmqpRequest`]s.
#[derive(Clone)]
pub struct AmqpHandler {
    transport: Arc<dyn AmqpTransport>,
}

impl std::fmt::Debug for AmqpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpHandler").finish_non_exhaustive()
    }
}

impl AmqpHandler {
    pub const ID: &'static str = "amqp";

    pub fn new(transport: Arc<dyn AmqpTransport>) -> Self {
        Self { transport }
    }

    async fn publish(&self, request: &AmqpRequest, template: &ResponseTemplate, cancel: CancellationToken) -> Result<Response> {
        if request.exchange.is_none() && request.queue.is_none() {
            return Err(SendError::ConfigurationError(format!(
                "AMQP publish to {} needs an exchange or a queue",
                request.url
            )));
        }
        let payload = request.body.as_ref().map(|b| b.to_bytes()).unwrap_or_default();
        let receipt = tokio::select! {
            receipt = self.transport.publish(request, payload, cancel.clone()) => receipt,
            _ = cancel.cancelled() => Err(StreamFailure::new("publish cancelled")),
        };
        Ok(match receipt {
            Ok(receipt) => {
                let mut response = template.response(None, receipt);
                response.status_message = Some("OK".to_string());
                response
            }
            Err(failure) => template.interim(
                template.name.clone().unwrap_or_default(),
                &StreamChunk::Error(failure),
            ),
        })
    }

    async fn consume(
        &self,
        ctx: &mut ProcessorContext,
        request: &AmqpRequest,
        template: &ResponseTemplate,
        cancel: CancellationToken,
    ) -> Result<Response> {
        if request.queue.is_none() {
            return Err(SendError::ConfigurationError(format!(
                "AMQP consume from {} needs a queue",
                request.url
            )));
        }
        let (sink, events) = chunk_channel();
        let (signals, session) = StreamSignals::new();
        let logs = PendingLogs::new(if ctx.region.metadata.no_streaming_log {
            None
        } else {
            ctx.log_stream.clone()
        });
        let collector = tokio::spawn(collect_chunks(
            events,
            cancel.clone(),
            signals,
            logs,
            template.clone(),
            request.url.clone(),
        ));
        let driver = {
            let transport = self.transport.clone();
            let request = request.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(failure) = transport.consume(request, sink.clone(), cancel).await {
                    sink.error(failure);
                }
                sink.close();
            })
        };

        ctx.streaming = Some(session);
        let hooks = ctx.on_streaming_hooks();
        let governed = hooks.trigger_collect(ctx).await.map(drop);
        ctx.streaming = None;
        cancel.cancel();

        let collected = collector
            .await
            .map_err(|e| SendError::InternalError(format!("AMQP delivery collector failed: {e}")))?;
        driver.abort();
        governed?;
        tracing::debug!(target: "regionflow::amqp", deliveries = collected.chunks.len(), "consumer stopped");

        let mut template = template.clone();
        template.headers = collected.metadata.clone();
        let response = reduce_list(&template, &collected.chunks);
        collected.logs.join_all().await;
        Ok(response)
    }
}

#[async_trait]
impl ProtocolHandler for AmqpHandler {
    fn id(&self) -> &str {
        Self::ID
    }

    fn protocol(&self) -> Protocol {
        Protocol::Amqp
    }

    async fn process(&self, ctx: &mut ProcessorContext) -> Result<bool> {
        if !matches!(ctx.request, Some(Request::Amqp(_))) {
            return Ok(false);
        }
        if !before_request(ctx).await? {
            return Ok(false);
        }
        let Some(Request::Amqp(request)) = ctx.request.clone() else {
            return Ok(false);
        };
        if let Some(progress) = &ctx.progress {
            progress.report(&format!("request AMQP {}", request.url));
        }
        tracing::debug!(target: "regionflow::amqp", url = %request.url, method = ?request.method, "amqp exchange");

        let started = Instant::now();
        let template = ResponseTemplate::new(Protocol::Amqp, "application/json")
            .with_name(format!("AMQP {}", request.url))
            .with_request(Request::Amqp(request.clone()));
        let cancel = CancellationToken::new();
        let dispose = ctx.progress.as_ref().map(|progress| {
            let cancel = cancel.clone();
            progress.register(move || cancel.cancel())
        });

        let result = match request.method {
            AmqpMethod::Publish => self.publish(&request, &template, cancel.clone()).await,
            AmqpMethod::Consume => self.consume(ctx, &request, &template, cancel.clone()).await,
        };
        cancel.cancel();
        if let Some(dispose) = dispose {
            dispose.dispose();
        }
        let mut response = result?;
        response.timings = Timings {
            total: elapsed_ms(started),
            first_byte: None,
        };

        after_response(ctx, response).await?;
        Ok(true)
    }
}
