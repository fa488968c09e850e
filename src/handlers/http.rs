//! HTTP handler built on reqwest.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use super::ProtocolHandler;
use super::envelope::{after_response, before_request};
use crate::config::RequestConfig;
use crate::error::{Result, SendError};
use crate::processor::ProcessorContext;
use crate::types::headers::value_to_header_string;
use crate::types::{Body, ContentType, Headers, HttpRequest, Protocol, Request, Response};
use crate::utils::elapsed_ms;

/// Build a reqwest client from the request settings.
pub(crate) fn build_client(config: &RequestConfig, accept_invalid_certs: bool) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();

    if let Some(timeout) = config.timeout_duration() {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| SendError::ConfigurationError(format!("Invalid proxy URL: {e}")))?;
        builder = builder.proxy(proxy);
    }

    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent);
    }

    if accept_invalid_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| SendError::HttpError(format!("Failed to create HTTP client: {e}")))
}

/// Convert request headers, skipping the names in `skip` (lowercase).
pub(crate) fn header_map(headers: &Headers, skip: &[&str]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers.iter() {
        if skip.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        let Some(value) = value_to_header_string(value) else {
            continue;
        };
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SendError::ConfigurationError(format!("Invalid header name '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(&value).map_err(|e| {
            SendError::ConfigurationError(format!("Invalid header value for '{name}': {e}"))
        })?;
        map.append(header_name, header_value);
    }
    Ok(map)
}

/// Response headers; repeated names become arrays.
pub(crate) fn response_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for name in map.keys() {
        let values: Vec<String> = map
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        match values.as_slice() {
            [single] => headers.insert(name.as_str(), single.clone()),
            _ => headers.insert(name.as_str(), values),
        };
    }
    headers
}

/// Sends [`HttpRequest`]s.
///
/// Transport failures and cancellation become `-1` responses; only
/// malformed requests are errors.
#[derive(Debug, Clone)]
pub struct HttpHandler {
    client: reqwest::Client,
    insecure: reqwest::Client,
}

impl HttpHandler {
    pub const ID: &'static str = "http";

    pub fn new(config: &RequestConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config, !config.rejects_unauthorized())?,
            insecure: build_client(config, true)?,
        })
    }

    fn client_for(&self, ctx: &ProcessorContext) -> &reqwest::Client {
        if ctx.region.metadata.no_reject_unauthorized || !ctx.config.request.rejects_unauthorized() {
            &self.insecure
        } else {
            &self.client
        }
    }

    fn build(&self, ctx: &ProcessorContext, request: &HttpRequest) -> Result<reqwest::RequestBuilder> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| SendError::ConfigurationError(format!("Invalid method '{}': {e}", request.method)))?;
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| SendError::ConfigurationError(format!("Invalid URL '{}': {e}", request.url)))?;

        let mut headers = header_map(&request.headers, &[])?;
        let mut builder = self.client_for(ctx).request(method, url);
        match &request.body {
            Some(Body::Text(text)) => builder = builder.body(text.clone()),
            Some(Body::Bytes(bytes)) => builder = builder.body(bytes.clone()),
            Some(Body::Json(value)) => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                builder = builder.body(serde_json::to_vec(value)?);
            }
            None => {}
        }
        if let Some(timeout) = ctx.config.request.timeout_duration() {
            builder = builder.timeout(timeout);
        }
        Ok(builder.headers(headers))
    }

    async fn exchange(&self, builder: reqwest::RequestBuilder, started: Instant) -> Response {
        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(target: "regionflow::http", error = %err, "request failed");
                return Response::protocol_error(Protocol::Http, err.to_string());
            }
        };
        let first_byte = elapsed_ms(started);

        let mut normalized = Response::new(Protocol::Http);
        normalized.status_code = i64::from(response.status().as_u16());
        normalized.status_message = response.status().canonical_reason().map(str::to_string);
        normalized.http_version = Some(format!("{:?}", response.version()));
        normalized.headers = response_headers(response.headers());
        normalized.content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ContentType::parse);
        normalized.timings.first_byte = Some(first_byte);

        match response.bytes().await {
            Ok(raw) => {
                normalized.body = String::from_utf8_lossy(&raw).into_owned();
                if normalized.content_type.as_ref().is_some_and(ContentType::is_json) {
                    normalized.parsed_body = serde_json::from_slice(&raw).ok();
                }
                normalized.raw_body = raw;
            }
            Err(err) => {
                tracing::warn!(target: "regionflow::http", error = %err, "reading response body failed");
                return Response::protocol_error(Protocol::Http, err.to_string());
            }
        }
        normalized
    }
}

#[async_trait]
impl ProtocolHandler for HttpHandler {
    fn id(&self) -> &str {
        Self::ID
    }

    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    async fn process(&self, ctx: &mut ProcessorContext) -> Result<bool> {
        if !matches!(ctx.request, Some(Request::Http(_))) {
            return Ok(false);
        }
        if !before_request(ctx).await? {
            return Ok(false);
        }
        // on_request hooks may have rewritten the request
        let Some(Request::Http(request)) = ctx.request.clone() else {
            return Ok(false);
        };
        let builder = self.build(ctx, &request)?;

        tracing::debug!(target: "regionflow::http", method = %request.method, url = %request.url, "sending request");
        let started = Instant::now();
        let mut response = match ctx.progress.clone() {
            Some(progress) => tokio::select! {
                response = self.exchange(builder, started) => response,
                _ = progress.cancelled() => Response::protocol_error(Protocol::Http, "request cancelled"),
            },
            None => self.exchange(builder, started).await,
        };
        response.timings.total = elapsed_ms(started);
        response.name = Some(format!("{} {}", request.method.to_ascii_uppercase(), request.url));
        response.request = Some(Request::Http(request));
        tracing::debug!(target: "regionflow::http", status = response.status_code, total_ms = response.timings.total, "response received");

        after_response(ctx, response).await?;
        Ok(true)
    }
}
