//! Shared fakes for the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use regionflow::config::StaticConfigProvider;
use regionflow::handlers::amqp::AmqpTransport;
use regionflow::handlers::grpc::{RpcCall, RpcReply, RpcTransport};
use regionflow::prelude::*;
use regionflow::processor::VariableProviderContext;
use regionflow::streaming::ChunkSink;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type Trace = Arc<Mutex<Vec<String>>>;

pub fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(trace: &Trace) -> Vec<String> {
    trace.lock().unwrap().clone()
}

pub fn vars(value: Value) -> Variables {
    value.as_object().cloned().expect("object")
}

/// Sender that never touches the file system for configuration.
pub fn sender(registry: HandlerRegistry) -> Sender {
    Sender::builder(Arc::new(registry))
        .config_provider(Arc::new(StaticConfigProvider::default()))
        .build()
}

/// Action hook recording the region name and answering a fixed result.
pub struct Action {
    pub answer: HookResult<bool>,
    pub trace: Trace,
}

#[async_trait]
impl Hook<ProcessorContext, bool> for Action {
    async fn call(&self, ctx: &mut ProcessorContext) -> Result<HookResult<bool>> {
        self.trace.lock().unwrap().push(ctx.region.name.clone());
        Ok(self.answer.clone())
    }
}

/// Region whose only action records itself and answers `answer`.
pub fn action_region(name: &str, answer: HookResult<bool>, trace: &Trace) -> Region {
    let mut region = Region::new(name);
    region
        .hooks
        .execute
        .add_hook(
            "record",
            Action {
                answer,
                trace: trace.clone(),
            },
            HookConstraints::none(),
        )
        .unwrap();
    region
}

/// Provider hook answering a fixed value.
pub struct Fixed<T>(pub T);

#[async_trait]
impl<T: Clone + Send + Sync> Hook<VariableProviderContext, T> for Fixed<T> {
    async fn call(&self, _ctx: &mut VariableProviderContext) -> Result<HookResult<T>> {
        Ok(HookResult::Value(self.0.clone()))
    }
}

/// Observer hook answering `Cancel`.
pub struct CancelObserver;

#[async_trait]
impl Hook<ProcessorContext, ()> for CancelObserver {
    async fn call(&self, _ctx: &mut ProcessorContext) -> Result<HookResult<()>> {
        Ok(HookResult::Cancel)
    }
}

/// `on_streaming` hook writing messages on the request stream.
pub struct WriteMessages(pub Vec<Value>);

#[async_trait]
impl Hook<ProcessorContext, ()> for WriteMessages {
    async fn call(&self, ctx: &mut ProcessorContext) -> Result<HookResult<()>> {
        let session = ctx
            .streaming
            .as_ref()
            .ok_or_else(|| SendError::hook("writeMessages", "no streaming session"))?;
        for message in &self.0 {
            session.write(message.clone())?;
        }
        Ok(HookResult::Value(()))
    }
}

/// Log sink remembering every call.
#[derive(Debug, Default)]
pub struct RecordingLog {
    calls: Mutex<Vec<(String, Response)>>,
    fail: bool,
}

impl RecordingLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn labels(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(l, _)| l.clone()).collect()
    }

    /// Names of the logged responses in call order.
    pub fn names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.name.clone().unwrap_or_default())
            .collect()
    }

    pub fn last(&self) -> Response {
        self.calls.lock().unwrap().last().expect("logged response").1.clone()
    }
}

#[async_trait]
impl LogStream for RecordingLog {
    async fn log(&self, label: &str, response: &Response) -> Result<()> {
        self.calls.lock().unwrap().push((label.to_string(), response.clone()));
        if self.fail {
            return Err(SendError::InternalError("sink unavailable".into()));
        }
        Ok(())
    }
}

/// One scripted event of a fake stream.
#[derive(Debug, Clone)]
pub enum Step {
    Metadata(Headers),
    Data(Value),
    Error(StreamFailure),
    End,
    Close,
}

fn play(sink: &ChunkSink, steps: &[Step]) {
    for step in steps {
        match step.clone() {
            Step::Metadata(headers) => sink.metadata(headers),
            Step::Data(value) => sink.data(value),
            Step::Error(failure) => sink.error(failure),
            Step::End => sink.end(),
            Step::Close => sink.close(),
        }
    }
}

/// In-memory RPC transport.
///
/// Unary calls answer `reply`; client streams answer `{"count": n}`;
/// server streams play `steps`; bidi streams echo every write and then play
/// `steps`. With `hang` set, calls stay open until their token fires and
/// server streams then fail with code 1, the way a torn down call does.
/// With `deaf` set, server streams never finish on their own.
pub struct FakeRpc {
    pub reply: std::result::Result<RpcReply, StreamFailure>,
    pub steps: Vec<Step>,
    pub hang: bool,
    pub deaf: bool,
    pub calls: Mutex<Vec<RpcCall>>,
    pub received: Mutex<Vec<Value>>,
}

impl Default for FakeRpc {
    fn default() -> Self {
        Self {
            reply: Ok(RpcReply::new(json!({}))),
            steps: Vec::new(),
            hang: false,
            deaf: false,
            calls: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
        }
    }
}

impl FakeRpc {
    pub fn calls(&self) -> Vec<RpcCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    fn record(&self, call: &RpcCall, payload: Option<Value>) {
        self.calls.lock().unwrap().push(call.clone());
        if let Some(payload) = payload {
            self.received.lock().unwrap().push(payload);
        }
    }
}

#[async_trait]
impl RpcTransport for FakeRpc {
    async fn unary(&self, call: RpcCall, payload: Value) -> std::result::Result<RpcReply, StreamFailure> {
        self.record(&call, Some(payload));
        if self.hang {
            call.cancel.cancelled().await;
            return Err(StreamFailure::new("cancelled").with_code(1));
        }
        self.reply.clone()
    }

    async fn client_streaming(
        &self,
        call: RpcCall,
        mut writes: mpsc::UnboundedReceiver<Value>,
    ) -> std::result::Result<RpcReply, StreamFailure> {
        self.record(&call, None);
        let mut count = 0;
        while let Some(message) = writes.recv().await {
            self.received.lock().unwrap().push(message);
            count += 1;
        }
        Ok(RpcReply::new(json!({ "count": count })))
    }

    async fn server_streaming(
        &self,
        call: RpcCall,
        payload: Value,
        sink: ChunkSink,
    ) -> std::result::Result<(), StreamFailure> {
        self.record(&call, Some(payload));
        play(&sink, &self.steps);
        if self.deaf {
            std::future::pending::<()>().await;
        }
        if self.hang {
            call.cancel.cancelled().await;
            sink.error(StreamFailure::new("call cancelled").with_code(1));
            sink.close();
        }
        Ok(())
    }

    async fn bidi_streaming(
        &self,
        call: RpcCall,
        mut writes: mpsc::UnboundedReceiver<Value>,
        sink: ChunkSink,
    ) -> std::result::Result<(), StreamFailure> {
        self.record(&call, None);
        while let Some(message) = writes.recv().await {
            self.received.lock().unwrap().push(message.clone());
            sink.data(json!({ "echo": message }));
        }
        play(&sink, &self.steps);
        Ok(())
    }
}

/// In-memory broker.
#[derive(Default)]
pub struct FakeAmqp {
    pub deliveries: Vec<Value>,
    pub fail_publish: Option<StreamFailure>,
    /// Keep consuming until cancelled instead of closing after the deliveries.
    pub hang: bool,
    pub published: Mutex<Vec<(AmqpRequest, Bytes)>>,
}

#[async_trait]
impl AmqpTransport for FakeAmqp {
    async fn publish(
        &self,
        request: &AmqpRequest,
        payload: Bytes,
        _cancel: CancellationToken,
    ) -> std::result::Result<Value, StreamFailure> {
        if let Some(failure) = &self.fail_publish {
            return Err(failure.clone());
        }
        let size = payload.len();
        self.published.lock().unwrap().push((request.clone(), payload));
        Ok(json!({ "delivered": true, "bytes": size }))
    }

    async fn consume(
        &self,
        _request: AmqpRequest,
        sink: ChunkSink,
        cancel: CancellationToken,
    ) -> std::result::Result<(), StreamFailure> {
        for delivery in &self.deliveries {
            sink.data(delivery.clone());
        }
        if self.hang {
            cancel.cancelled().await;
        }
        sink.close();
        Ok(())
    }
}
