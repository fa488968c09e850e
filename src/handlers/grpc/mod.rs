//! gRPC handler
//!
//! Resolves the target method from the request url and the definitions in
//! `context.options[PROTO_DEFINITIONS]`, then places the call through the
//! injected [`RpcTransport`] with the shape the method declares:
//!
//! | request stream | response stream | shape |
//! |---|---|---|
//! | no | no | unary: one payload, one reply |
//! | yes | no | client streaming: payload written once, `on_streaming` ends the writes |
//! | no | yes | server streaming: chunks collected until `end`/`close` |
//! | yes | yes | bidi: writes as client streaming, reads as server streaming |

pub mod service;
pub mod transport;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ProtocolHandler;
use super::envelope::{after_response, before_request};
use crate::error::{Result, SendError};
use crate::processor::ProcessorContext;
use crate::streaming::{
    ChunkSink, Collected, PendingLogs, ResponseTemplate, StreamChunk, StreamFailure, StreamSignals,
    StreamingSession, chunk_channel, collect_chunks, reduce_list,
};
use crate::types::{Body, ChannelCredentials, GrpcRequest, Protocol, Request, Response, Timings};
use crate::utils::{Dispose, elapsed_ms};

pub use service::{
    GrpcUrl, MethodDefinition, PROTO_DEFINITIONS, ProtoDefinitions, ProtoNode, ResolvedMethod,
    ServiceDefinition,
};
pub use transport::{
    CHANNEL_CREDENTIALS_HEADER, CallShape, Metadata, MetadataValue, RpcCall, RpcReply,
    RpcTransport, metadata_from_headers,
};

const GRPC_JSON: &str = "application/grpc+json";

/// Decode the request body into a message.
fn payload(body: Option<&Body>) -> Result<Option<Value>> {
    match body {
        None => Ok(None),
        Some(Body::Json(value)) => Ok(Some(value.clone())),
        Some(Body::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Body::Text(text)) => serde_json::from_str(text)
            .map(Some)
            .map_err(|e| SendError::ParseError(format!("gRPC body is not valid JSON: {e}"))),
        Some(Body::Bytes(bytes)) => serde_json::from_slice(bytes)
            .map(Some)
            .map_err(|e| SendError::ParseError(format!("gRPC body is not valid JSON: {e}"))),
    }
}

/// Handles [`GrpcRequest`]s.
#[derive(Clone)]
pub struct GrpcHandler {
    transport: Arc<dyn RpcTransport>,
}

impl std::fmt::Debug for GrpcHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcHandler").finish_non_exhaustive()
    }
}

/// State of one call shared by the shape-specific paths.
struct Exchange {
    call: RpcCall,
    payload: Option<Value>,
    template: ResponseTemplate,
    label: String,
    started: Instant,
}

impl Exchange {
    fn required_payload(&mut self) -> Result<Value> {
        self.payload.take().ok_or_else(|| {
            SendError::ConfigurationError(format!(
                "gRPC call {} needs a request body",
                self.call.method_path
            ))
        })
    }

    fn finish(&self, mut response: Response) -> Response {
        response.timings = Timings {
            total: elapsed_ms(self.started),
            first_byte: None,
        };
        response
    }

    fn unary_response(&self, reply: std::result::Result<RpcReply, StreamFailure>) -> Response {
        let response = match reply {
            Ok(reply) => {
                let mut template = self.template.clone();
                template.headers = reply.metadata;
                let mut response = template.response(None, reply.message);
                response.status_message = Some("OK".to_string());
                response
            }
            Err(failure) => self.template.interim(
                self.template.name.clone().unwrap_or_default(),
                &StreamChunk::Error(failure),
            ),
        };
        self.finish(response)
    }

    fn streamed_response(&self, collected: &Collected) -> Response {
        let mut template = self.template.clone();
        template.headers = collected.metadata.clone();
        self.finish(reduce_list(&template, &collected.chunks))
    }
}

impl GrpcHandler {
    pub const ID: &'static str = "grpc";

    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    fn prepare(&self, ctx: &ProcessorContext, request: &GrpcRequest, cancel: CancellationToken) -> Result<Exchange> {
        let url = GrpcUrl::parse(&request.url)?;
        let definitions = ctx
            .options
            .get::<ProtoDefinitions>(PROTO_DEFINITIONS)
            .ok_or_else(|| SendError::ConfigurationError("no proto definitions loaded".to_string()))?;
        let resolved = definitions.resolve(&url)?;
        let method_path = resolved.path();
        let shape = resolved.definition.shape();
        tracing::debug!(target: "regionflow::grpc", server = %url.server, method = %method_path, ?shape, "resolved call");

        Ok(Exchange {
            payload: payload(request.body.as_ref())?,
            template: ResponseTemplate::new(Protocol::Grpc, GRPC_JSON)
                .with_name(format!("GRPC {}", request.url))
                .with_request(Request::Grpc(request.clone())),
            label: method_path.clone(),
            call: RpcCall {
                tls: url.uses_tls() || matches!(request.credentials, ChannelCredentials::Tls { .. }),
                server: url.server,
                path: url.path,
                service: resolved.service,
                method: resolved.method,
                method_path,
                shape,
                metadata: metadata_from_headers(&request.headers),
                credentials: request.credentials.clone(),
                channel_options: request.channel_options.clone(),
                cancel,
            },
            started: Instant::now(),
        })
    }

    async fn unary(&self, mut exchange: Exchange) -> Result<Response> {
        let payload = exchange.required_payload()?;
        let cancel = exchange.call.cancel.clone();
        let reply = tokio::select! {
            reply = self.transport.unary(exchange.call.clone(), payload) => reply,
            _ = cancel.cancelled() => Err(StreamFailure::new("Cancellation").with_code(1)),
        };
        Ok(exchange.unary_response(reply))
    }

    async fn client_streaming(&self, ctx: &mut ProcessorContext, exchange: Exchange) -> Result<Response> {
        let (writer, writes) = mpsc::unbounded_channel();
        if let Some(payload) = &exchange.payload {
            // receiver is alive until the transport task below drops it
            let _ = writer.send(payload.clone());
        }
        let cancel = exchange.call.cancel.clone();
        let transport = self.transport.clone();
        let call = exchange.call.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                reply = transport.client_streaming(call, writes) => reply,
                _ = cancel.cancelled() => Err(StreamFailure::new("Cancellation").with_code(1)),
            }
        });

        let (signals, session) = StreamSignals::new();
        govern_writes(ctx, session.with_writer(writer)).await?;
        drop(signals);

        let reply = task
            .await
            .map_err(|e| SendError::InternalError(format!("gRPC call task failed: {e}")))?;
        Ok(exchange.unary_response(reply))
    }

    async fn response_streaming(
        &self,
        ctx: &mut ProcessorContext,
        mut exchange: Exchange,
    ) -> Result<Response> {
        let (sink, events) = chunk_channel();
        let (signals, session) = StreamSignals::new();
        let logs = PendingLogs::new(if ctx.region.metadata.no_streaming_log {
            None
        } else {
            ctx.log_stream.clone()
        });
        // `stop` ends collection when the hooks resolve; a cancelled call is
        // drained until the transport finishes so its teardown is recorded.
        let stop = CancellationToken::new();
        let cancel = exchange.call.cancel.clone();
        let collector = tokio::spawn(collect_chunks(
            events,
            stop.clone(),
            signals,
            logs,
            exchange.template.clone(),
            exchange.label.clone(),
        ));

        let driver = if exchange.call.shape.request_stream() {
            let (writer, writes) = mpsc::unbounded_channel();
            if let Some(payload) = exchange.payload.take() {
                let _ = writer.send(payload);
            }
            let driver = self.drive(sink.clone(), cancel.clone(), {
                let transport = self.transport.clone();
                let call = exchange.call.clone();
                let sink = sink.clone();
                async move { transport.bidi_streaming(call, writes, sink).await }
            });
            govern_writes(ctx, session.with_writer(writer)).await?;
            driver
        } else {
            let payload = exchange.required_payload()?;
            let driver = self.drive(sink.clone(), cancel.clone(), {
                let transport = self.transport.clone();
                let call = exchange.call.clone();
                let sink = sink.clone();
                async move { transport.server_streaming(call, payload, sink).await }
            });
            let hooks = ctx.on_streaming_hooks();
            if !hooks.is_empty() {
                ctx.streaming = Some(session);
                let governed = hooks.trigger_collect(ctx).await;
                ctx.streaming = None;
                governed?;
                // the hooks decided to stop listening
                if !sink.is_resolved() {
                    stop.cancel();
                    cancel.cancel();
                }
            }
            driver
        };
        drop(sink);

        let collected = collector
            .await
            .map_err(|e| SendError::InternalError(format!("gRPC stream collector failed: {e}")))?;
        driver.abort();
        tracing::debug!(target: "regionflow::grpc", end = ?collected.end, chunks = collected.chunks.len(), "stream resolved");
        let response = exchange.streamed_response(&collected);
        collected.logs.join_all().await;
        Ok(response)
    }

    /// Run a streaming transport call; a failure is recorded as an error
    /// chunk and every outcome closes the sink.
    ///
    /// A call still open when `cancel` fires is torn down with a
    /// `Cancellation` error (code 1) unless the transport resolves the
    /// stream itself.
    fn drive<F>(&self, sink: ChunkSink, cancel: CancellationToken, call: F) -> tokio::task::JoinHandle<()>
    where
        F: std::future::Future<Output = std::result::Result<(), StreamFailure>> + Send + 'static,
    {
        tokio::spawn(async move {
            let cancellation = || StreamFailure::new("Cancellation").with_code(1);
            let outcome = tokio::select! {
                biased;
                outcome = call => outcome,
                _ = cancel.cancelled() => Err(cancellation()),
            };
            let outcome = match outcome {
                Ok(()) if cancel.is_cancelled() && !sink.is_resolved() => Err(cancellation()),
                outcome => outcome,
            };
            if let Err(failure) = outcome {
                sink.error(failure);
            }
            sink.close();
        })
    }
}

/// Run the `on_streaming` hooks with write access to the request stream.
/// Writes end when the session is dropped.
async fn govern_writes(ctx: &mut ProcessorContext, session: StreamingSession) -> Result<()> {
    let hooks = ctx.on_streaming_hooks();
    if hooks.is_empty() {
        return Ok(());
    }
    ctx.streaming = Some(session);
    let governed = hooks.trigger_collect(ctx).await;
    ctx.streaming = None;
    governed.map(drop)
}

#[async_trait]
impl ProtocolHandler for GrpcHandler {
    fn id(&self) -> &str {
        Self::ID
    }

    fn protocol(&self) -> Protocol {
        Protocol::Grpc
    }

    async fn process(&self, ctx: &mut ProcessorContext) -> Result<bool> {
        if !matches!(ctx.request, Some(Request::Grpc(_))) {
            return Ok(false);
        }
        if !before_request(ctx).await? {
            return Ok(false);
        }
        let Some(Request::Grpc(request)) = ctx.request.clone() else {
            return Ok(false);
        };
        if let Some(progress) = &ctx.progress {
            progress.report(&format!("request gRPC {}", request.url));
        }

        let cancel = CancellationToken::new();
        let exchange = self.prepare(ctx, &request, cancel.clone())?;
        let dispose: Option<Dispose> = ctx.progress.as_ref().map(|progress| {
            let cancel = cancel.clone();
            progress.register(move || cancel.cancel())
        });

        let result = match exchange.call.shape {
            CallShape::Unary => self.unary(exchange).await,
            CallShape::ClientStreaming => self.client_streaming(ctx, exchange).await,
            CallShape::ServerStreaming | CallShape::Bidi => self.response_streaming(ctx, exchange).await,
        };
        cancel.cancel();
        if let Some(dispose) = dispose {
            dispose.dispose();
        }
        let response = result?;
        tracing::debug!(target: "regionflow::grpc", status = response.status_code, total_ms = response.timings.total, "call finished");

        after_response(ctx, response).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_parses_text_and_bytes() {
        assert_eq!(payload(None).unwrap(), None);
        assert_eq!(payload(Some(&Body::from("  "))).unwrap(), None);
        assert_eq!(
            payload(Some(&Body::from(r#"{"name": "world"}"#))).unwrap(),
            Some(json!({"name": "world"}))
        );
        assert_eq!(
            payload(Some(&Body::from(br#"[1]"#.to_vec()))).unwrap(),
            Some(json!([1]))
        );
        assert!(matches!(
            payload(Some(&Body::from("{oops"))),
            Err(SendError::ParseError(_))
        ));
    }
}
