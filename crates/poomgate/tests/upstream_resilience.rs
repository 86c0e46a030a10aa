//! Retry, failover and error classification against mock upstreams.

use poomgate::{UpstreamBases, UpstreamClient, UpstreamRequest, REQUEST_ID_HEADER};
use poomproto::{codes, ToolError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(bases: &[String], timeout: Duration) -> UpstreamClient {
    UpstreamClient::new(UpstreamBases::new(bases).unwrap(), timeout).unwrap()
}

async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[tokio::test]
async fn fails_over_to_second_base_and_leaves_third_untouched() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    let third = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&first)
        .await;
    Mock::given(method("GET"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"runs": [{"run_id": "r1"}]})))
        .expect(1)
        .mount(&second)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&third)
        .await;

    let upstream = client(
        &[first.uri(), second.uri(), third.uri()],
        Duration::from_secs(2),
    );
    let value = upstream.call(&UpstreamRequest::get(["runs"])).await.unwrap();
    assert_eq!(value, json!({"runs": [{"run_id": "r1"}]}));
}

#[tokio::test]
async fn single_502_is_retried_on_same_base() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&first)
        .await;
    Mock::given(method("GET"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"runs": []})))
        .expect(1)
        .mount(&first)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&second)
        .await;

    let upstream = client(&[first.uri(), second.uri()], Duration::from_secs(2));
    let value = upstream.call(&UpstreamRequest::get(["runs"])).await.unwrap();
    assert_eq!(value, json!({"runs": []}));
}

#[tokio::test]
async fn second_consecutive_503_fails_over() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&first)
        .await;
    Mock::given(method("GET"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"runs": []})))
        .expect(1)
        .mount(&second)
        .await;

    let upstream = client(&[first.uri(), second.uri()], Duration::from_secs(2));
    assert!(upstream.call(&UpstreamRequest::get(["runs"])).await.is_ok());
}

#[tokio::test]
async fn all_bases_failing_surfaces_last_error() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    for server in [&first, &second] {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(server)
            .await;
    }

    let upstream = client(&[first.uri(), second.uri()], Duration::from_secs(2));
    let err = upstream.call(&UpstreamRequest::get(["runs"])).await.unwrap_err();
    assert!(err.is(codes::UPSTREAM_TIMEOUT));
    assert!(err.retryable);
}

#[tokio::test]
async fn timeout_counts_as_transport_failure() {
    let slow = MockServer::start().await;
    let fast = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"runs": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&slow)
        .await;
    Mock::given(method("GET"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"runs": [{"run_id": "fast"}]})))
        .expect(1)
        .mount(&fast)
        .await;

    let upstream = client(&[slow.uri(), fast.uri()], Duration::from_millis(200));
    let value = upstream.call(&UpstreamRequest::get(["runs"])).await.unwrap();
    assert_eq!(value["runs"][0]["run_id"], "fast");

    let only_slow = client(&[slow.uri()], Duration::from_millis(200));
    let err = only_slow
        .call(&UpstreamRequest::get(["runs"]))
        .await
        .unwrap_err();
    assert!(err.is(codes::UPSTREAM_TIMEOUT));
    assert!(err.retryable);
}

#[tokio::test]
async fn connection_refused_fails_over() {
    let dead = closed_port_url().await;
    let live = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"runs": []})))
        .expect(1)
        .mount(&live)
        .await;

    let upstream = client(&[dead, live.uri()], Duration::from_secs(2));
    assert!(upstream.call(&UpstreamRequest::get(["runs"])).await.is_ok());
}

#[tokio::test]
async fn not_found_does_not_fail_over() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/runs/r404/manifest"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&first)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&second)
        .await;

    let upstream = client(&[first.uri(), second.uri()], Duration::from_secs(2));
    let err = upstream
        .call(&UpstreamRequest::get(["runs", "r404", "manifest"]))
        .await
        .unwrap_err();
    assert!(err.is(codes::RUN_NOT_FOUND));
    assert!(!err.retryable);
}

#[tokio::test]
async fn embedded_error_is_propagated_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pipeline/jobs"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error": {"code": "SOURCE_UNSUPPORTED", "message": "only mp4 sources", "retryable": false}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let upstream = client(&[server.uri()], Duration::from_secs(2));
    let err = upstream
        .call(&UpstreamRequest::post(["pipeline", "jobs"], json!({"source_url": "x"})))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ToolError::new("SOURCE_UNSUPPORTED", "only mp4 sources", false)
    );
}

#[tokio::test]
async fn malformed_success_body_becomes_empty_object() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let upstream = client(&[server.uri()], Duration::from_secs(2));
    let value = upstream.call(&UpstreamRequest::get(["runs"])).await.unwrap();
    assert_eq!(value, json!({}));
}

#[tokio::test]
async fn every_attempt_carries_fresh_request_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let upstream = client(&[server.uri()], Duration::from_secs(2));
    let _ = upstream.call(&UpstreamRequest::get(["runs"])).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let ids: HashSet<String> = requests
        .iter()
        .map(|r| {
            r.headers
                .get(REQUEST_ID_HEADER)
                .expect("request id header")
                .to_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(ids.len(), 2);
    for id in &ids {
        assert!(uuid_like(id), "{id}");
    }
}

#[tokio::test]
async fn path_segments_are_percent_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quiz/run%20one/seg%2F2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"questions": []})))
        .expect(1)
        .mount(&server)
        .await;

    let upstream = client(&[server.uri()], Duration::from_secs(2));
    upstream
        .call(&UpstreamRequest::get(["quiz", "run one", "seg/2"]))
        .await
        .unwrap();
}

fn uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4
}

#[tokio::test]
async fn traceparent_follows_the_active_span() {
    use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
    use tracing::Instrument;
    use tracing_opentelemetry::OpenTelemetrySpanExt;
    use tracing_subscriber::layer::SubscriberExt;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder().build();
    let subscriber = tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("poomgate-test")));
    let _guard = tracing::subscriber::set_default(subscriber);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"runs": []})))
        .mount(&server)
        .await;
    let upstream = client(&[server.uri()], Duration::from_secs(2));

    let span = tracing::info_span!("list_runs");
    let trace_id = span.context().span().span_context().trace_id().to_string();
    upstream
        .call(&UpstreamRequest::get(["runs"]))
        .instrument(span)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let header = requests[0]
        .headers
        .get("traceparent")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .expect("traceparent header");
    let parts: Vec<&str> = header.split('-').collect();
    assert_eq!(parts.len(), 4, "{header}");
    assert_eq!(parts[0], "00");
    assert_eq!(parts[1], trace_id);
    assert_eq!(parts[2].len(), 16);
    assert_eq!(parts[3], "01");
}

#[tokio::test]
async fn no_traceparent_without_a_span_context() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"runs": []})))
        .mount(&server)
        .await;
    let upstream = client(&[server.uri()], Duration::from_secs(2));

    upstream.call(&UpstreamRequest::get(["runs"])).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("traceparent").is_none());
    assert!(requests[0].headers.get(REQUEST_ID_HEADER).is_some());
}
