//! Server-sent events handler.
//!
//! The connection is read on its own task while the merged `on_streaming`
//! hooks decide how long to listen; with no hooks the connection is closed
//! right away. Events of the subscribed types are grouped per type; once
//! the hooks resolve the connection is closed and the groups are reduced
//! into one response.

use std::time::Instant;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use indexmap::IndexMap;
use reqwest::header::{ACCEPT, HeaderValue};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::ProtocolHandler;
use super::envelope::{after_response, before_request};
use super::http::{build_client, header_map, response_headers};
use crate::config::RequestConfig;
use crate::error::{Result, SendError};
use crate::processor::ProcessorContext;
use crate::streaming::{
    ERROR_EVENT, PendingLogs, ResponseTemplate, StreamChunk, StreamSignals, reduce_keyed,
};
use crate::types::{EventSourceRequest, Headers, Protocol, Request, Timings};
use crate::utils::elapsed_ms;

/// Event type used when neither `events` nor an `event` header is given.
pub const DEFAULT_EVENT: &str = "message";

/// Header listing the subscribed event types; never sent.
const EVENT_HEADER: &str = "event";

/// Subscribed event types of a request.
pub fn subscribed_events(request: &EventSourceRequest) -> Vec<String> {
    if request.events.is_empty() {
        request.headers.get_list(EVENT_HEADER, &[DEFAULT_EVENT])
    } else {
        request.events.clone()
    }
}

struct Capture {
    events: IndexMap<String, Vec<Value>>,
    headers: Headers,
    first_byte: Option<u64>,
    logs: PendingLogs,
}

impl Capture {
    fn record_error(&mut self, error: Value) {
        tracing::debug!(target: "regionflow::sse", %error, "event source error");
        self.events.entry(ERROR_EVENT.to_string()).or_default().push(error);
    }
}

struct Reader {
    builder: reqwest::RequestBuilder,
    subscribed: Vec<String>,
    url: String,
    template: ResponseTemplate,
    started: Instant,
}

impl Reader {
    async fn run(self, stop: CancellationToken, signals: StreamSignals, logs: PendingLogs) -> Capture {
        let mut capture = Capture {
            events: IndexMap::new(),
            headers: Headers::new(),
            first_byte: None,
            logs,
        };

        let response = tokio::select! {
            response = self.builder.send() => response,
            _ = stop.cancelled() => return capture,
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                capture.record_error(json!({ "message": err.to_string() }));
                return capture;
            }
        };
        capture.first_byte = Some(elapsed_ms(self.started));
        capture.headers = response_headers(response.headers());
        let status = response.status();
        if !status.is_success() {
            capture.record_error(json!({
                "statusCode": status.as_u16(),
                "message": status.canonical_reason().unwrap_or("unexpected status"),
            }));
            return capture;
        }

        let mut stream = response.bytes_stream().eventsource();
        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = stop.cancelled() => break,
            };
            match next {
                Some(Ok(event)) => {
                    if !self.subscribed.iter().any(|kind| *kind == event.event) {
                        tracing::trace!(target: "regionflow::sse", event = %event.event, "ignoring unsubscribed event");
                        continue;
                    }
                    let value = serde_json::from_str(&event.data).unwrap_or(Value::String(event.data));
                    signals.message_received();
                    if capture.logs.is_enabled() {
                        let name = if event.id.is_empty() {
                            format!("SSE {} ({})", event.event, self.url)
                        } else {
                            format!("SSE {} {} ({})", event.event, event.id, self.url)
                        };
                        let mut interim = self.template.interim(name.clone(), &StreamChunk::Data(value.clone()));
                        interim.headers = capture.headers.clone();
                        capture.logs.log(name, interim);
                    }
                    capture.events.entry(event.event).or_default().push(value);
                }
                Some(Err(err)) => {
                    capture.record_error(json!({ "message": err.to_string() }));
                    break;
                }
                None => break,
            }
        }
        tracing::debug!(target: "regionflow::sse", url = %self.url, "event stream closed");
        capture
    }
}

/// Handles [`EventSourceRequest`]s.
#[derive(Debug, Clone)]
pub struct EventSourceHandler {
    client: reqwest::Client,
    insecure: reqwest::Client,
}

impl EventSourceHandler {
    pub const ID: &'static str = "sse";

    pub fn new(config: &RequestConfig) -> Result<Self> {
        // no overall timeout: the connection is meant to stay open
        let config = RequestConfig {
            timeout: None,
            ..config.clone()
        };
        Ok(Self {
            client: build_client(&config, !config.rejects_unauthorized())?,
            insecure: build_client(&config, true)?,
        })
    }

    fn reader(&self, ctx: &ProcessorContext, request: &EventSourceRequest, started: Instant) -> Result<Reader> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| SendError::ConfigurationError(format!("Invalid URL '{}': {e}", request.url)))?;
        let mut headers = header_map(&request.headers, &[EVENT_HEADER])?;
        headers
            .entry(ACCEPT)
            .or_insert(HeaderValue::from_static("text/event-stream"));

        let client = if ctx.region.metadata.no_reject_unauthorized || !ctx.config.request.rejects_unauthorized() {
            &self.insecure
        } else {
            &self.client
        };
        Ok(Reader {
            builder: client.get(url).headers(headers),
            subscribed: subscribed_events(request),
            url: request.url.clone(),
            template: ResponseTemplate::new(Protocol::EventSource, "application/json")
                .with_name(format!("SSE {}", request.url))
                .with_request(Request::EventSource(request.clone())),
            started,
        })
    }
}

#[async_trait]
impl ProtocolHandler for EventSourceHandler {
    fn id(&self) -> &str {
        Self::ID
    }

    fn protocol(&self) -> Protocol {
        Protocol::EventSource
    }

    async fn process(&self, ctx: &mut ProcessorContext) -> Result<bool> {
        if !matches!(ctx.request, Some(Request::EventSource(_))) {
            return Ok(false);
        }
        if !before_request(ctx).await? {
            return Ok(false);
        }
        let Some(Request::EventSource(request)) = ctx.request.clone() else {
            return Ok(false);
        };
        if let Some(progress) = &ctx.progress {
            progress.report(&format!("request SSE {}", request.url));
        }

        let started = Instant::now();
        let reader = self.reader(ctx, &request, started)?;
        let mut template = reader.template.clone();
        tracing::debug!(target: "regionflow::sse", url = %request.url, events = ?reader.subscribed, "opening event stream");

        let stop = CancellationToken::new();
        let dispose = ctx.progress.as_ref().map(|progress| {
            let stop = stop.clone();
            progress.register(move || stop.cancel())
        });
        let (signals, session) = StreamSignals::new();
        let logs = PendingLogs::new(if ctx.region.metadata.no_streaming_log {
            None
        } else {
            ctx.log_stream.clone()
        });
        let task = tokio::spawn(reader.run(stop.clone(), signals, logs));

        // without hooks the stream resolves at once; callers that want to
        // listen register `UntilClosed`, `WaitForMessages` or `StreamingTimeout`
        ctx.streaming = Some(session);
        let hooks = ctx.on_streaming_hooks();
        let governed = hooks.trigger_collect(ctx).await.map(drop);
        ctx.streaming = None;
        stop.cancel();
        if let Some(dispose) = dispose {
            dispose.dispose();
        }

        let capture = task
            .await
            .map_err(|e| SendError::InternalError(format!("event stream reader failed: {e}")))?;
        governed?;
        capture.logs.join_all().await;

        template.headers = capture.headers;
        template.timings = Timings {
            total: elapsed_ms(started),
            first_byte: capture.first_byte,
        };
        let response = reduce_keyed(&template, &capture.events);
        tracing::debug!(target: "regionflow::sse", status = response.status_code, "event stream reduced");
        after_response(ctx, response).await?;
        Ok(true)
    }
}
