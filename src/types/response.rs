//! Normalized response shape shared by every protocol.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::headers::Headers;
use super::request::{Protocol, Request};

/// Status code of a response whose status has not been decided yet.
pub const STATUS_UNSET: i64 = 0;
/// Status code used when a protocol-level error carries no code of its own.
pub const STATUS_PROTOCOL_ERROR: i64 = -1;

/// Content type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentType {
    pub mime_type: String,
    pub charset: Option<String>,
    pub content_type: String,
}

impl ContentType {
    /// Parse a `Content-Type` header value such as `application/json; charset=utf-8`.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(';');
        let mime_type = parts
            .next()
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let charset = parts.find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_string())
        });
        Self {
            mime_type,
            charset,
            content_type: raw.trim().to_string(),
        }
    }

    /// UTF-8 JSON descriptor for a given mime type.
    pub fn json_utf8(mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            charset: Some("UTF-8".to_string()),
            content_type: format!("{mime_type}; charset=utf-8"),
        }
    }

    pub fn is_json(&self) -> bool {
        self.mime_type == "application/json"
            || self.mime_type.ends_with("+json")
            || self.mime_type.ends_with("/json")
    }
}

/// Timing information, all values in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timings {
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_byte: Option<u64>,
}

/// A normalized response.
///
/// `body`, `raw_body` and `parsed_body` are three views of the same payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status_code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_version: Option<String>,
    pub headers: Headers,
    pub body: String,
    #[serde(skip)]
    pub raw_body: Bytes,
    pub parsed_body: Option<Value>,
    pub content_type: Option<ContentType>,
    pub timings: Timings,
    #[serde(skip)]
    pub request: Option<Request>,
}

impl Response {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            name: None,
            status_code: STATUS_UNSET,
            status_message: None,
            http_version: None,
            headers: Headers::new(),
            body: String::new(),
            raw_body: Bytes::new(),
            parsed_body: None,
            content_type: None,
            timings: Timings::default(),
            request: None,
        }
    }

    /// Response describing a transport failure (connection refused, cancellation...).
    pub fn protocol_error(protocol: Protocol, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut response = Self::new(protocol);
        response.status_code = STATUS_PROTOCOL_ERROR;
        response.body = message.clone();
        response.raw_body = Bytes::from(message.clone());
        response.status_message = Some(message);
        response
    }

    /// Set text body and keep raw bytes in sync.
    pub fn set_text_body(&mut self, body: impl Into<String>) {
        let body = body.into();
        self.raw_body = Bytes::from(body.clone());
        self.body = body;
    }

    pub fn is_success(&self) -> bool {
        match self.protocol {
            Protocol::Http => (200..300).contains(&self.status_code),
            _ => self.status_code >= 0,
        }
    }
}
