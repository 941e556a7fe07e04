// Integration tests for `Transport` and `Requester` using wiremock.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use homeconnect_api::transport::VENDOR_JSON;
use homeconnect_api::{
    BodyValidator, DefaultHooks, Error, EventStreamError, Request, Requester, RetryConfig,
    Transport, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn config(server: &MockServer) -> TransportConfig {
    TransportConfig::new(url::Url::parse(&server.uri()).unwrap())
}

async fn setup() -> (MockServer, Transport) {
    let server = MockServer::start().await;
    let transport = Transport::new(config(&server)).unwrap();
    (server, transport)
}

async fn setup_requester(retry: RetryConfig) -> (MockServer, Requester) {
    let server = MockServer::start().await;
    let transport = Transport::new(config(&server)).unwrap();
    (server, Requester::new(transport, retry))
}

fn vendor_json(body: &serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), VENDOR_JSON)
}

#[derive(Default)]
struct RecordingValidator {
    seen: Mutex<Vec<(String, serde_json::Value)>>,
}

impl BodyValidator for RecordingValidator {
    fn validate(&self, request: &Request, body: &serde_json::Value) {
        self.seen
            .lock()
            .unwrap()
            .push((request.path.clone(), body.clone()));
    }
}

// ── Decoders ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_decode_json_passes_body_through_validator() {
    let server = MockServer::start().await;
    let validator = Arc::new(RecordingValidator::default());
    let transport = Transport::new(config(&server))
        .unwrap()
        .with_validator(Arc::clone(&validator) as Arc<dyn BodyValidator>);

    let body = json!({ "data": { "homeappliances": [] } });
    Mock::given(method("GET"))
        .and(path("/api/homeappliances"))
        .and(header("accept", VENDOR_JSON))
        .respond_with(vendor_json(&body))
        .mount(&server)
        .await;

    let request = Request::get("/api/homeappliances");
    let response = transport.send(&request).await.unwrap();
    let value: serde_json::Value = transport.decode_json(&request, response).await.unwrap();

    assert_eq!(value, body);
    let seen = validator.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "/api/homeappliances");
}

#[tokio::test]
async fn test_decode_json_rejects_wrong_content_type() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/homeappliances"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html/>", "text/html"))
        .mount(&server)
        .await;

    let request = Request::get("/api/homeappliances");
    let response = transport.send(&request).await.unwrap();
    let err = transport
        .decode_json::<serde_json::Value>(&request, response)
        .await
        .unwrap_err();

    match err {
        Error::Validation { body, .. } => assert_eq!(body, "<html/>"),
        other => panic!("expected Validation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_decode_json_rejects_no_content() {
    let (server, transport) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/api/homeappliances/X/settings/A"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let request = Request::put("/api/homeappliances/X/settings/A").json(json!({}));
    let response = transport.send(&request).await.unwrap();
    let err = transport
        .decode_json::<serde_json::Value>(&request, response)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[tokio::test]
async fn test_decode_empty_accepts_204() {
    let (server, transport) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/api/homeappliances/X/programs/active"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let request = Request::delete("/api/homeappliances/X/programs/active");
    let response = transport.send(&request).await.unwrap();
    transport.decode_empty(&request, response).await.unwrap();
}

/// Serve one canned HTTP/1.1 response on a local socket. wiremock always
/// labels its bodies with a content-length, so chunked replies need this.
async fn serve_once(raw: &'static str) -> url::Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0_u8; 4096];
        let _ = socket.read(&mut buf).await;
        socket.write_all(raw.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
    });
    url::Url::parse(&format!("http://{addr}")).unwrap()
}

#[tokio::test]
async fn test_decode_empty_rejects_chunked_body() {
    let base_url = serve_once(
        "HTTP/1.1 200 OK\r\n\
         transfer-encoding: chunked\r\n\
         connection: close\r\n\r\n\
         2\r\n{}\r\n0\r\n\r\n",
    )
    .await;
    let transport = Transport::new(TransportConfig::new(base_url)).unwrap();

    let request = Request::delete("/api/homeappliances/X/programs/active");
    let response = transport.send(&request).await.unwrap();
    assert!(response.headers().get("content-length").is_none());

    match transport.decode_empty(&request, response).await.unwrap_err() {
        Error::Validation { message, body } => {
            assert!(message.contains("got 2 bytes"), "{message}");
            assert_eq!(body, "{}");
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_decode_redirect_requires_302() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/security/oauth/authorize"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", "https://example.test/cb?code=c1"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/other"))
        .respond_with(vendor_json(&json!({})))
        .mount(&server)
        .await;

    let request = Request::get("/security/oauth/authorize");
    let response = transport.send(&request).await.unwrap();
    let location = transport.decode_redirect(&request, response).await.unwrap();
    assert_eq!(location, "https://example.test/cb?code=c1");

    let request = Request::get("/other");
    let response = transport.send(&request).await.unwrap();
    let err = transport.decode_redirect(&request, response).await.unwrap_err();
    assert_eq!(err.status(), Some(200));
}

#[tokio::test]
async fn test_error_body_is_parsed() {
    let (server, transport) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/homeappliances/X/programs/active"))
        .respond_with(ResponseTemplate::new(404).set_body_raw(
            r#"{"error":{"key":"SDK.Error.NoProgramActive","description":"No program active"}}"#,
            VENDOR_JSON,
        ))
        .mount(&server)
        .await;

    let request = Request::get("/api/homeappliances/X/programs/active");
    let err = transport.send(&request).await.unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(err.error_code(), Some("SDK.Error.NoProgramActive"));
}

// ── Event stream ────────────────────────────────────────────────────

#[tokio::test]
async fn test_event_stream_yields_records_then_ended() {
    let (server, transport) = setup().await;

    let body = "event: KEEP-ALIVE\n\n\
                event: STATUS\r\nid: SIEMENS-HCS02DWH1-6F2FC400C1EA4A\r\n\
                data: {\"items\":[{\"key\":\"BSH.Common.Status.DoorState\",\"value\":\"BSH.Common.EnumType.DoorState.Open\"}]}\r\n\r\n";

    Mock::given(method("GET"))
        .and(path("/api/homeappliances/events"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let request = Request::get("/api/homeappliances/events").event_stream();
    let response = transport.send(&request).await.unwrap();
    let items: Vec<_> = transport.open_event_stream(&request, response).collect().await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap().event(), Some("KEEP-ALIVE"));
    let status = items[1].as_ref().unwrap();
    assert_eq!(status.event(), Some("STATUS"));
    assert_eq!(status.id(), Some("SIEMENS-HCS02DWH1-6F2FC400C1EA4A"));
    assert!(status.data().unwrap().contains("DoorState"));
    assert!(matches!(items[2], Err(EventStreamError::Ended)));
}

// ── Retry & rate limiting ───────────────────────────────────────────

#[tokio::test]
async fn test_retry_after_is_honoured() {
    let (server, requester) = setup_requester(RetryConfig::default()).await;

    Mock::given(method("GET"))
        .and(path("/api/homeappliances"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/homeappliances"))
        .respond_with(vendor_json(&json!({ "data": { "homeappliances": [] } })))
        .expect(1)
        .mount(&server)
        .await;

    let start = Instant::now();
    let (_, response) = requester
        .execute(&Request::get("/api/homeappliances"), &DefaultHooks)
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_rate_limit_without_retry_after_backs_off_and_gives_up() {
    let (server, requester) = setup_requester(RetryConfig {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        max_retries: Some(2),
    })
    .await;

    Mock::given(method("GET"))
        .and(path("/api/homeappliances"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let start = Instant::now();
    let err = tokio::time::timeout(
        Duration::from_secs(10),
        requester.execute(&Request::get("/api/homeappliances"), &DefaultHooks),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert_eq!(err.status(), Some(429));
    // One second minimum pause after each bare 429 that was retried.
    assert!(start.elapsed() >= Duration::from_secs(2));
    // The last 429 still pushed the shared clock.
    assert!(requester.clock().remaining() > Duration::ZERO);
}

#[tokio::test]
async fn test_non_idempotent_request_is_not_retried() {
    let (server, requester) = setup_requester(RetryConfig::default()).await;

    Mock::given(method("PUT"))
        .and(path("/api/homeappliances/X/commands/BSH.Common.Command.PauseProgram"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/security/oauth/token"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = requester
        .execute(&Request::post("/security/oauth/token"), &DefaultHooks)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));

    // PUT is idempotent, so the same failure is retried until the limit.
    let requester = Requester::new(
        Transport::new(config(&server)).unwrap(),
        RetryConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            max_retries: Some(1),
        },
    );
    let err = requester
        .execute(
            &Request::put("/api/homeappliances/X/commands/BSH.Common.Command.PauseProgram")
                .json(json!({ "data": { "key": "BSH.Common.Command.PauseProgram", "value": true } })),
            &DefaultHooks,
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn test_fixed_client_errors_are_not_retried() {
    let (server, requester) = setup_requester(RetryConfig::default()).await;

    Mock::given(method("GET"))
        .and(path("/api/homeappliances/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = requester
        .execute(&Request::get("/api/homeappliances/missing"), &DefaultHooks)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
