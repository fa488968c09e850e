//! Event source handler against a mock server.

mod support;

use std::sync::Arc;
use std::time::Duration;

use regionflow::prelude::*;
use serde_json::json;
use support::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED: &str = "event: update\ndata: {\"n\":1}\n\n\
                    event: ping\ndata: keepalive\n\n\
                    data: plain\n\n\
                    event: update\nid: 2\ndata: {\"n\":2}\n\n";

async fn feed_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(FEED),
        )
        .mount(&server)
        .await;
    server
}

/// Server sending one event and then keeping the connection open.
async fn open_ended_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let event = "data: hi\n\n";
                let reply = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{event}\r\n",
                    event.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                std::future::pending::<()>().await;
            });
        }
    });
    format!("http://{addr}/events")
}

fn listening(name: &str, request: EventSourceRequest) -> Region {
    let mut region = Region::new(name).with_request(request);
    region
        .hooks
        .on_streaming
        .add_hook("until-closed", UntilClosed, HookConstraints::none())
        .unwrap();
    region
}

async fn send(request: EventSourceRequest, log_stream: Option<Arc<RecordingLog>>) -> Response {
    let mut file = HttpFile::new("events.http");
    let region = file.push_region(listening("events", request));
    let log = RecordingLog::new();
    let mut context = SendContext::region(Arc::new(file), region).with_log_response(log.clone());
    if let Some(stream) = log_stream {
        context = context.with_log_stream(stream);
    }
    let registry = HandlerRegistry::with_defaults(&EnvironmentConfig::default()).unwrap();
    assert!(sender(registry).send(context).await.unwrap());
    log.last()
}

#[tokio::test]
async fn subscribed_events_are_grouped_by_type() {
    let server = feed_server().await;
    let mut request = EventSourceRequest::new(format!("{}/events", server.uri()));
    request.events = vec!["update".into(), "message".into()];

    let response = send(request, None).await;
    assert_eq!(response.status_code, 0);
    assert_eq!(
        response.parsed_body,
        Some(json!({"update": [{"n": 1}, {"n": 2}], "message": ["plain"]}))
    );
    assert_eq!(response.protocol, Protocol::EventSource);
    assert!(response.timings.first_byte.is_some());
}

#[tokio::test]
async fn default_subscription_is_message() {
    let server = feed_server().await;
    let response = send(EventSourceRequest::new(format!("{}/events", server.uri())), None).await;
    assert_eq!(response.parsed_body, Some(json!({"message": ["plain"]})));
}

#[tokio::test]
async fn event_header_selects_events_and_is_not_sent() {
    let server = feed_server().await;
    let mut request = EventSourceRequest::new(format!("{}/events", server.uri()));
    request.headers.insert("event", "ping");
    request.headers.insert("x-client", "tests");

    let response = send(request, None).await;
    assert_eq!(response.parsed_body, Some(json!({"ping": ["keepalive"]})));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(!received[0].headers.contains_key("event"));
    assert_eq!(received[0].headers.get("x-client").unwrap(), "tests");
    assert_eq!(received[0].headers.get("accept").unwrap(), "text/event-stream");
}

#[tokio::test]
async fn server_errors_land_under_the_error_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let response = send(EventSourceRequest::new(server.uri()), None).await;
    assert_eq!(response.status_code, -1);
    assert_eq!(response.status_message.as_deref(), Some("Internal Server Error"));
    assert_eq!(response.parsed_body.unwrap()["error"][0]["statusCode"], 500);
}

#[tokio::test]
async fn every_event_is_surfaced_as_an_interim_response() {
    let server = feed_server().await;
    let url = format!("{}/events", server.uri());
    let mut request = EventSourceRequest::new(url.clone());
    request.events = vec!["update".into()];
    let stream = RecordingLog::new();

    send(request, Some(stream.clone())).await;
    assert_eq!(stream.len(), 2);
    assert_eq!(
        stream.names(),
        [format!("SSE update ({url})"), format!("SSE update 2 ({url})")]
    );
}

#[tokio::test]
async fn no_streaming_log_silences_interim_responses() {
    let server = feed_server().await;
    let mut file = HttpFile::new("events.http");
    let mut region = listening(
        "quiet",
        EventSourceRequest::new(format!("{}/events", server.uri())),
    );
    region.metadata.no_streaming_log = true;
    let region = file.push_region(region);
    let stream = RecordingLog::new();

    let registry = HandlerRegistry::with_defaults(&EnvironmentConfig::default()).unwrap();
    assert!(
        sender(registry)
            .send(SendContext::region(Arc::new(file), region).with_log_stream(stream.clone()))
            .await
            .unwrap()
    );
    assert_eq!(stream.len(), 0);
}

#[tokio::test]
async fn wait_for_messages_stops_listening_early() {
    let server = feed_server().await;
    let mut file = HttpFile::new("events.http");
    let mut request = EventSourceRequest::new(format!("{}/events", server.uri()));
    request.events = vec!["update".into()];
    let mut region = Region::new("first").with_request(request);
    region
        .hooks
        .on_streaming
        .add_hook("wait", WaitForMessages(1), HookConstraints::none())
        .unwrap();
    let region = file.push_region(region);
    let log = RecordingLog::new();

    let registry = HandlerRegistry::with_defaults(&EnvironmentConfig::default()).unwrap();
    assert!(
        sender(registry)
            .send(SendContext::region(Arc::new(file), region).with_log_response(log.clone()))
            .await
            .unwrap()
    );
    let updates = log.last().parsed_body.unwrap()["update"].as_array().unwrap().len();
    assert!((1..=2).contains(&updates));
}

#[tokio::test]
async fn without_hooks_an_open_stream_resolves_at_once() {
    let url = open_ended_server().await;
    let mut file = HttpFile::new("events.http");
    let region = file.push_region(Region::new("open").with_request(EventSourceRequest::new(url)));
    let log = RecordingLog::new();
    let registry = HandlerRegistry::with_defaults(&EnvironmentConfig::default()).unwrap();

    let ok = tokio::time::timeout(
        Duration::from_secs(3),
        sender(registry).send(SendContext::region(Arc::new(file), region).with_log_response(log.clone())),
    )
    .await
    .expect("send finished while the server kept the stream open")
    .unwrap();
    assert!(ok);
    assert_eq!(log.last().status_code, 0);
}

#[tokio::test]
async fn streaming_timeout_reads_an_open_stream_then_closes_it() {
    let url = open_ended_server().await;
    let mut file = HttpFile::new("events.http");
    let mut region = Region::new("open").with_request(EventSourceRequest::new(url));
    region
        .hooks
        .on_streaming
        .add_hook("timeout", StreamingTimeout(Duration::from_millis(500)), HookConstraints::none())
        .unwrap();
    let region = file.push_region(region);
    let log = RecordingLog::new();
    let registry = HandlerRegistry::with_defaults(&EnvironmentConfig::default()).unwrap();

    let ok = tokio::time::timeout(
        Duration::from_secs(5),
        sender(registry).send(SendContext::region(Arc::new(file), region).with_log_response(log.clone())),
    )
    .await
    .expect("send finished after the streaming timeout")
    .unwrap();
    assert!(ok);
    assert_eq!(log.last().parsed_body, Some(json!({"message": ["hi"]})));
}
