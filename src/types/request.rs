//! Protocol-tagged request model.
//!
//! A [`Request`] always carries exactly one protocol tag: the enum variant.
//! Handlers match on the variant instead of probing the shape of the value.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::headers::Headers;

/// Protocol discriminant of a request or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Grpc,
    #[serde(rename = "sse")]
    EventSource,
    Amqp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Grpc => "GRPC",
            Protocol::EventSource => "SSE",
            Protocol::Amqp => "AMQP",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload: raw bytes, text, or an already structured value.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Bytes(Bytes),
    Json(Value),
}

impl Body {
    /// Decode the payload as structured data (text and bytes are parsed as JSON).
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            Body::Text(text) => serde_json::from_str(text),
            Body::Bytes(bytes) => serde_json::from_slice(bytes),
            Body::Json(value) => Ok(value.clone()),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Body::Text(text) => Bytes::from(text.clone()),
            Body::Bytes(bytes) => bytes.clone(),
            Body::Json(value) => Bytes::from(value.to_string()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_string())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Body>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }
}

/// Transport security for an RPC channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ChannelCredentials {
    #[default]
    Insecure,
    Tls {
        ca_certificate: Option<Bytes>,
        domain: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrpcRequest {
    /// `[protocol://]server[/path]/service/method`
    pub url: String,
    pub headers: Headers,
    pub body: Option<Body>,
    pub credentials: ChannelCredentials,
    /// Extra channel options handed to the transport untouched.
    pub channel_options: serde_json::Map<String, Value>,
}

impl GrpcRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Headers::new(),
            body: None,
            credentials: ChannelCredentials::default(),
            channel_options: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventSourceRequest {
    pub url: String,
    pub headers: Headers,
    /// Event types to subscribe to. Empty means: use the `event` header, or
    /// the implicit `message` type.
    pub events: Vec<String>,
}

impl EventSourceRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Headers::new(),
            events: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmqpMethod {
    #[default]
    Publish,
    Consume,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmqpRequest {
    pub url: String,
    pub method: AmqpMethod,
    pub headers: Headers,
    pub body: Option<Body>,
    pub exchange: Option<String>,
    pub queue: Option<String>,
    pub routing_key: Option<String>,
}

impl AmqpRequest {
    pub fn new(url: impl Into<String>, method: AmqpMethod) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Headers::new(),
            body: None,
            exchange: None,
            queue: None,
            routing_key: None,
        }
    }
}

/// A request bound to exactly one protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Http(HttpRequest),
    Grpc(GrpcRequest),
    EventSource(EventSourceRequest),
    Amqp(AmqpRequest),
}

impl Request {
    pub fn protocol(&self) -> Protocol {
        match self {
            Request::Http(_) => Protocol::Http,
            Request::Grpc(_) => Protocol::Grpc,
            Request::EventSource(_) => Protocol::EventSource,
            Request::Amqp(_) => Protocol::Amqp,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Request::Http(r) => &r.url,
            Request::Grpc(r) => &r.url,
            Request::EventSource(r) => &r.url,
            Request::Amqp(r) => &r.url,
        }
    }

    pub fn url_mut(&mut self) -> &mut String {
        match self {
            Request::Http(r) => &mut r.url,
            Request::Grpc(r) => &mut r.url,
            Request::EventSource(r) => &mut r.url,
            Request::Amqp(r) => &mut r.url,
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            Request::Http(r) => &r.headers,
            Request::Grpc(r) => &r.headers,
            Request::EventSource(r) => &r.headers,
            Request::Amqp(r) => &r.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Request::Http(r) => &mut r.headers,
            Request::Grpc(r) => &mut r.headers,
            Request::EventSource(r) => &mut r.headers,
            Request::Amqp(r) => &mut r.headers,
        }
    }

    pub fn body(&self) -> Option<&Body> {
        match self {
            Request::Http(r) => r.body.as_ref(),
            Request::Grpc(r) => r.body.as_ref(),
            Request::EventSource(_) => None,
            Request::Amqp(r) => r.body.as_ref(),
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut Body> {
        match self {
            Request::Http(r) => r.body.as_mut(),
            Request::Grpc(r) => r.body.as_mut(),
            Request::EventSource(_) => None,
            Request::Amqp(r) => r.body.as_mut(),
        }
    }
}

impl From<HttpRequest> for Request {
    fn from(value: HttpRequest) -> Self {
        Request::Http(value)
    }
}

impl From<GrpcRequest> for Request {
    fn from(value: GrpcRequest) -> Self {
        Request::Grpc(value)
    }
}

impl From<EventSourceRequest> for Request {
    fn from(value: EventSourceRequest) -> Self {
        Request::EventSource(value)
    }
}

impl From<AmqpRequest> for Request {
    fn from(value: AmqpRequest) -> Self {
        Request::Amqp(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_decodes_text_and_bytes_as_json() {
        assert_eq!(Body::from(r#"{"a":1}"#).to_json().unwrap(), json!({"a": 1}));
        assert_eq!(Body::from(b"[1,2]".to_vec()).to_json().unwrap(), json!([1, 2]));
        assert!(Body::from("not json").to_json().is_err());
    }

    #[test]
    fn request_exposes_its_single_protocol_tag() {
        let req: Request = EventSourceRequest::new("http://localhost/events").into();
        assert_eq!(req.protocol(), Protocol::EventSource);
        assert_eq!(req.protocol().to_string(), "SSE");
        assert!(req.body().is_none());
    }
}
