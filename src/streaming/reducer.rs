//! Folding streamed chunks into one [`Response`].
//!
//! Two accumulation shapes are supported: an ordered list of chunks (RPC
//! and queue consumers) and a map of event type to ordered values (event
//! sources). Either way the whole accumulation becomes the body and the
//! first error-shaped entry decides the status.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::types::{
    ContentType, Headers, Protocol, Request, Response, STATUS_PROTOCOL_ERROR, STATUS_UNSET,
    Timings,
};

/// Key under which event sources store transport errors.
pub const ERROR_EVENT: &str = "error";

/// A failure reported by the remote side of a stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamFailure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl StreamFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Status the failure maps to; `-1` when the remote gave no code or a
    /// zero code, so a failure never reads as success.
    pub fn status_code(&self) -> i64 {
        match self.code {
            Some(code) if code != STATUS_UNSET => code,
            _ => STATUS_PROTOCOL_ERROR,
        }
    }

    /// Human readable status, details preferred over the message.
    pub fn status_message(&self) -> String {
        self.details.clone().unwrap_or_else(|| self.message.clone())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "message": self.message }))
    }
}

/// One element of a streamed exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Data(Value),
    Error(StreamFailure),
}

impl StreamChunk {
    pub fn to_value(&self) -> Value {
        match self {
            StreamChunk::Data(value) => value.clone(),
            StreamChunk::Error(failure) => failure.to_value(),
        }
    }

    pub fn as_failure(&self) -> Option<&StreamFailure> {
        match self {
            StreamChunk::Error(failure) => Some(failure),
            StreamChunk::Data(_) => None,
        }
    }
}

/// Everything about the final response that is known before the stream
/// has been consumed.
#[derive(Debug, Clone)]
pub struct ResponseTemplate {
    pub protocol: Protocol,
    pub name: Option<String>,
    pub headers: Headers,
    pub content_type: ContentType,
    pub request: Option<Request>,
    pub timings: Timings,
}

impl ResponseTemplate {
    pub fn new(protocol: Protocol, mime_type: &str) -> Self {
        Self {
            protocol,
            name: None,
            headers: Headers::new(),
            content_type: ContentType::json_utf8(mime_type),
            request: None,
            timings: Timings::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_request(mut self, request: Request) -> Self {
        self.request = Some(request);
        self
    }

    /// A response carrying `value` as a pretty printed JSON body.
    pub fn response(&self, name: Option<String>, value: Value) -> Response {
        let mut response = Response::new(self.protocol);
        response.name = name.or_else(|| self.name.clone());
        response.headers = self.headers.clone();
        response.content_type = Some(self.content_type.clone());
        response.request = self.request.clone();
        response.timings = self.timings.clone();
        response.set_text_body(
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
        );
        response.parsed_body = Some(value);
        response
    }

    /// Interim response for a single chunk, status `0` unless it is an error.
    pub fn interim(&self, name: String, chunk: &StreamChunk) -> Response {
        let mut response = self.response(Some(name), chunk.to_value());
        if let Some(failure) = chunk.as_failure() {
            response.status_code = failure.status_code();
            response.status_message = Some(failure.status_message());
        }
        response
    }
}

/// Reduce an ordered chunk list.
///
/// Without error-shaped chunks the status stays `0` with message `OK`.
pub fn reduce_list(template: &ResponseTemplate, chunks: &[StreamChunk]) -> Response {
    let body = Value::Array(chunks.iter().map(StreamChunk::to_value).collect());
    let mut response = template.response(None, body);
    match chunks.iter().find_map(StreamChunk::as_failure) {
        Some(failure) => {
            response.status_code = failure.status_code();
            response.status_message = Some(failure.status_message());
        }
        None => {
            response.status_code = STATUS_UNSET;
            response.status_message = Some("OK".to_string());
        }
    }
    response
}

/// Reduce a per-event-type map. Any entry under [`ERROR_EVENT`] turns the
/// status into `-1`.
pub fn reduce_keyed(template: &ResponseTemplate, events: &IndexMap<String, Vec<Value>>) -> Response {
    let body = Value::Object(
        events
            .iter()
            .map(|(kind, values)| (kind.clone(), Value::Array(values.clone())))
            .collect(),
    );
    let mut response = template.response(None, body);
    match events.get(ERROR_EVENT).and_then(|errors| errors.first()) {
        Some(first) => {
            response.status_code = STATUS_PROTOCOL_ERROR;
            response.status_message = first
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some(first.to_string()));
        }
        None => response.status_code = STATUS_UNSET,
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> ResponseTemplate {
        ResponseTemplate::new(Protocol::Grpc, "application/grpc+json").with_name("GRPC test")
    }

    #[test]
    fn trailing_error_sets_its_code() {
        let chunks = vec![
            StreamChunk::Data(json!({"n": 1})),
            StreamChunk::Error(StreamFailure::new("unavailable").with_code(14)),
        ];
        let response = reduce_list(&template(), &chunks);
        assert_eq!(response.status_code, 14);
        assert_eq!(response.status_message.as_deref(), Some("unavailable"));
        assert_eq!(
            response.parsed_body,
            Some(json!([{"n": 1}, {"code": 14, "message": "unavailable"}]))
        );
    }

    #[test]
    fn error_without_code_maps_to_minus_one() {
        let chunks = vec![StreamChunk::Error(StreamFailure::new("boom").with_details("stream reset"))];
        let response = reduce_list(&template(), &chunks);
        assert_eq!(response.status_code, -1);
        assert_eq!(response.status_message.as_deref(), Some("stream reset"));
    }

    #[test]
    fn zero_code_failure_is_not_success() {
        let failure = StreamFailure::new("stream aborted").with_code(0);
        assert_eq!(failure.status_code(), -1);
        let response = reduce_list(&template(), &[StreamChunk::Error(failure)]);
        assert_eq!(response.status_code, -1);
        assert_eq!(response.status_message.as_deref(), Some("stream aborted"));
    }

    #[test]
    fn first_error_wins() {
        let chunks = vec![
            StreamChunk::Error(StreamFailure::new("first").with_code(4)),
            StreamChunk::Error(StreamFailure::new("second").with_code(13)),
        ];
        assert_eq!(reduce_list(&template(), &chunks).status_code, 4);
    }

    #[test]
    fn clean_streams_keep_a_non_negative_status() {
        let chunks = vec![StreamChunk::Data(json!(1)), StreamChunk::Data(json!(2))];
        let response = reduce_list(&template(), &chunks);
        assert_eq!(response.status_code, 0);
        assert_eq!(response.body, "[\n  1,\n  2\n]");
        assert_eq!(response.raw_body, response.body.as_bytes());
        assert_eq!(response.name.as_deref(), Some("GRPC test"));
    }

    #[test]
    fn keyed_reduction_flags_error_key() {
        let template = ResponseTemplate::new(Protocol::EventSource, "application/json");
        let mut events = IndexMap::new();
        events.insert("message".to_string(), vec![json!("hi")]);
        let ok = reduce_keyed(&template, &events);
        assert_eq!(ok.status_code, 0);
        assert_eq!(ok.parsed_body, Some(json!({"message": ["hi"]})));

        events.insert(ERROR_EVENT.to_string(), vec![json!({"message": "connection reset"})]);
        let failed = reduce_keyed(&template, &events);
        assert_eq!(failed.status_code, -1);
        assert_eq!(failed.status_message.as_deref(), Some("connection reset"));
    }
}
