//! HTTP handler against a local mock server.

mod support;

use std::sync::Arc;
use std::time::Duration;

use regionflow::prelude::*;
use serde_json::json;
use support::*;
use tracing_test::traced_test;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_sender() -> Sender {
    sender(HandlerRegistry::with_defaults(&EnvironmentConfig::default()).unwrap())
}

async fn send_one(request: HttpRequest, variables: serde_json::Value) -> (bool, Arc<RecordingLog>) {
    let mut file = HttpFile::new("api.http");
    let region = file.push_region(Region::new("call").with_request(request));
    let log = RecordingLog::new();
    let ok = http_sender()
        .send(
            SendContext::region(Arc::new(file), region)
                .with_variables(vars(variables))
                .with_log_response(log.clone()),
        )
        .await
        .unwrap();
    (ok, log)
}

#[tokio::test]
#[traced_test]
async fn get_with_placeholders_parses_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7, "name": "ada"})))
        .expect(1)
        .mount(&server)
        .await;

    let (ok, log) = send_one(
        HttpRequest::new("get", "{{host}}/users/{{user.id}}"),
        json!({"host": server.uri(), "user": {"id": 7}}),
    )
    .await;

    assert!(ok);
    let response = log.last();
    assert_eq!(response.status_code, 200);
    assert_eq!(response.status_message.as_deref(), Some("OK"));
    assert_eq!(response.parsed_body, Some(json!({"id": 7, "name": "ada"})));
    assert_eq!(response.content_type.as_ref().unwrap().mime_type, "application/json");
    assert_eq!(response.name, Some(format!("GET {}/users/7", server.uri())));
    assert!(response.timings.first_byte.is_some());
    assert_eq!(log.labels(), [format!("GET {}/users/7", server.uri())]);
    assert!(logs_contain("sending request"));
}

#[tokio::test]
async fn json_body_and_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(header("x-token", "secret"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"item": "tea", "qty": 2})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let mut request = HttpRequest::new("POST", format!("{}/orders", server.uri()));
    request.headers.insert("X-Token", "{{token}}");
    request.body = Some(Body::Json(json!({"item": "{{item}}", "qty": 2})));

    let (ok, log) = send_one(request, json!({"token": "secret", "item": "tea"})).await;
    assert!(ok);
    assert_eq!(log.last().status_code, 201);
}

#[tokio::test]
async fn error_statuses_are_responses_not_errors() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
        .mount(&server)
        .await;

    let (ok, log) = send_one(HttpRequest::new("DELETE", format!("{}/x", server.uri())), json!({})).await;
    assert!(ok);
    let response = log.last();
    assert_eq!(response.status_code, 404);
    assert_eq!(response.body, "missing");
    assert!(!response.is_success());
}

#[tokio::test]
async fn connection_failures_become_negative_status() {
    let (ok, log) = send_one(HttpRequest::new("GET", "http://127.0.0.1:1/unreachable"), json!({})).await;
    assert!(ok);
    assert_eq!(log.last().status_code, -1);
}

#[tokio::test]
async fn invalid_url_is_a_configuration_error() {
    let mut file = HttpFile::new("api.http");
    let region = file.push_region(Region::new("bad").with_request(HttpRequest::new("GET", "not a url")));
    let err = http_sender()
        .send(SendContext::region(Arc::new(file), region))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn failing_response_sink_does_not_fail_the_send() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let mut file = HttpFile::new("api.http");
    let region = file.push_region(Region::new("call").with_request(HttpRequest::new("GET", server.uri())));
    let sink = RecordingLog::failing();
    let ok = http_sender()
        .send(SendContext::region(Arc::new(file), region).with_log_response(sink.clone()))
        .await
        .unwrap();
    assert!(ok);
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn cancellation_folds_into_the_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let mut file = HttpFile::new("api.http");
    let region = file.push_region(Region::new("slow").with_request(HttpRequest::new("GET", server.uri())));
    let progress = CancelHandle::new();
    let log = RecordingLog::new();

    let canceller = {
        let progress = progress.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            progress.cancel();
        })
    };
    let ok = http_sender()
        .send(
            SendContext::region(Arc::new(file), region)
                .with_progress(progress)
                .with_log_response(log.clone()),
        )
        .await
        .unwrap();
    canceller.await.unwrap();

    assert!(ok);
    let response = log.last();
    assert_eq!(response.status_code, -1);
    assert_eq!(response.status_message.as_deref(), Some("request cancelled"));
}

#[tokio::test]
async fn on_response_hooks_see_the_response() {
    struct Capture(Trace);

    #[async_trait::async_trait]
    impl Hook<ProcessorContext, ()> for Capture {
        async fn call(&self, ctx: &mut ProcessorContext) -> regionflow::Result<HookResult<()>> {
            let status = ctx.response.as_ref().map(|r| r.status_code).unwrap_or_default();
            self.0.lock().unwrap().push(format!("{}:{status}", ctx.region.name));
            Ok(HookResult::Value(()))
        }
    }

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let trace = trace();
    let mut region = Region::new("observed").with_request(HttpRequest::new("GET", server.uri()));
    region
        .hooks
        .on_response
        .add_hook("capture", Capture(trace.clone()), HookConstraints::none())
        .unwrap();
    let mut file = HttpFile::new("api.http");
    let region = file.push_region(region);

    assert!(
        http_sender()
            .send(SendContext::region(Arc::new(file), region))
            .await
            .unwrap()
    );
    assert_eq!(entries(&trace), ["observed:202"]);
}
