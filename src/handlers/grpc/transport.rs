//! RPC transport seam.
//!
//! The wire library is supplied by the embedding application through
//! [`RpcTransport`]; the handler only decides which call shape to use and
//! how to fold the results.

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::streaming::{ChunkSink, StreamFailure};
use crate::types::{ChannelCredentials, Headers};

/// Header carrying channel credentials; never sent as metadata.
pub const CHANNEL_CREDENTIALS_HEADER: &str = "channelcredentials";

/// Call shape selected from the method's streaming flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidi,
}

impl CallShape {
    pub fn of(request_stream: bool, response_stream: bool) -> Self {
        match (request_stream, response_stream) {
            (false, false) => CallShape::Unary,
            (true, false) => CallShape::ClientStreaming,
            (false, true) => CallShape::ServerStreaming,
            (true, true) => CallShape::Bidi,
        }
    }

    pub fn request_stream(self) -> bool {
        matches!(self, CallShape::ClientStreaming | CallShape::Bidi)
    }

    pub fn response_stream(self) -> bool {
        matches!(self, CallShape::ServerStreaming | CallShape::Bidi)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Text(String),
    Binary(Bytes),
}

/// Outgoing call metadata in header order.
pub type Metadata = IndexMap<String, MetadataValue>;

/// Build call metadata from request headers.
///
/// Reserved keys are dropped, and so is every value that is not a string.
/// Keys ending in `-bin` carry their value as raw bytes.
pub fn metadata_from_headers(headers: &Headers) -> Metadata {
    let mut metadata = Metadata::new();
    for (key, value) in headers.iter() {
        if key.eq_ignore_ascii_case(CHANNEL_CREDENTIALS_HEADER) {
            continue;
        }
        let Value::String(text) = value else {
            tracing::debug!(target: "regionflow::grpc", %key, "skipping non string metadata");
            continue;
        };
        let entry = if key.to_ascii_lowercase().ends_with("-bin") {
            MetadataValue::Binary(Bytes::from(text.clone().into_bytes()))
        } else {
            MetadataValue::Text(text.clone())
        };
        metadata.insert(key.to_string(), entry);
    }
    metadata
}

/// Everything a transport needs to place one call.
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub server: String,
    /// Path prefix the channel must put in front of the method path.
    pub path: Option<String>,
    pub tls: bool,
    /// Fully qualified service name.
    pub service: String,
    pub method: String,
    /// `/package.Service/Method`
    pub method_path: String,
    pub shape: CallShape,
    pub metadata: Metadata,
    pub credentials: ChannelCredentials,
    pub channel_options: serde_json::Map<String, Value>,
    /// Fires when the call must be torn down; streaming transports answer
    /// by closing the sink.
    pub cancel: CancellationToken,
}

/// Single response message of a unary or client-streaming call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcReply {
    pub message: Value,
    pub metadata: Headers,
}

impl RpcReply {
    pub fn new(message: Value) -> Self {
        Self {
            message,
            metadata: Headers::new(),
        }
    }
}

/// One method per call shape.
///
/// Streaming methods report data, errors and the end of the stream through
/// the [`ChunkSink`]; they may return as soon as the call is set up or keep
/// driving it until it ends. Request streams end when `writes` closes.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn unary(&self, call: RpcCall, payload: Value) -> Result<RpcReply, StreamFailure>;

    async fn client_streaming(
        &self,
        call: RpcCall,
        writes: mpsc::UnboundedReceiver<Value>,
    ) -> Result<RpcReply, StreamFailure>;

    async fn server_streaming(
        &self,
        call: RpcCall,
        payload: Value,
        sink: ChunkSink,
    ) -> Result<(), StreamFailure>;

    async fn bidi_streaming(
        &self,
        call: RpcCall,
        writes: mpsc::UnboundedReceiver<Value>,
        sink: ChunkSink,
    ) -> Result<(), StreamFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_shape_table() {
        assert_eq!(CallShape::of(false, false), CallShape::Unary);
        assert_eq!(CallShape::of(true, false), CallShape::ClientStreaming);
        assert_eq!(CallShape::of(false, true), CallShape::ServerStreaming);
        assert_eq!(CallShape::of(true, true), CallShape::Bidi);
        assert!(CallShape::Bidi.request_stream() && CallShape::Bidi.response_stream());
    }

    #[test]
    fn metadata_keeps_strings_only() {
        let headers = Headers::new()
            .with("authorization", "Bearer x")
            .with("ChannelCredentials", "tls")
            .with("x-retries", json!(3))
            .with("trace-bin", "abc");
        let metadata = metadata_from_headers(&headers);
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["authorization"], MetadataValue::Text("Bearer x".into()));
        assert_eq!(metadata["trace-bin"], MetadataValue::Binary(Bytes::from_static(b"abc")));
    }
}
