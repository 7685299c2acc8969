//! # End-to-End Gateway Scenarios
//!
//! Each test drives the axum router in-process and lets the gateway talk
//! real UDP to a [`FakeCoapServer`] on loopback.

use std::time::Duration;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use coap_lite::{CoapOption, MessageClass, MessageType, RequestType, ResponseType};
use tokio::time::Instant;
use tower::ServiceExt;

use http2coap_gateway::{GatewayConfig, Http2CoapService};

use super::fake_server::{option_strings, Behaviour, FakeCoapServer, Reply};

const JSON: u16 = 50;

// =============================================================================
// FIXTURES
// =============================================================================

async fn gateway_for(server: &FakeCoapServer, exchange_timeout: Duration) -> Http2CoapService {
    let mut config = GatewayConfig::default();
    config.coap.destination_host = server.addr().ip().to_string();
    config.coap.destination_port = server.addr().port();
    config.timeouts.exchange = exchange_timeout;
    Http2CoapService::bind(config, server.addr()).await.unwrap()
}

async fn call(
    service: &Http2CoapService,
    method: &str,
    uri: &str,
    body: &'static [u8],
) -> (StatusCode, HeaderMap, Bytes) {
    let response = service
        .router()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test]
async fn test_get_json_content_maps_to_200() {
    let mut server = FakeCoapServer::start(Behaviour::Piggybacked(
        Reply::new(ResponseType::Content).with_content(JSON, br#"{"t":21}"#),
    ))
    .await;
    let service = gateway_for(&server, Duration::from_secs(5)).await;

    let (status, headers, body) = call(&service, "GET", "/sensors/temp", b"").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(headers["x-coap-response-code"], "2.05");
    assert_eq!(&body[..], br#"{"t":21}"#);
    assert!(headers.contains_key("x-request-id"));

    let request = server.next_packet().await;
    assert_eq!(request.header.get_type(), MessageType::Confirmable);
    assert_eq!(request.header.code, MessageClass::Request(RequestType::Get));
    assert_eq!(
        headers["x-coap-message-id"],
        request.header.message_id.to_string().as_str()
    );
    assert_eq!(
        option_strings(&request, CoapOption::UriPath),
        vec!["sensors", "temp"]
    );
    assert!(request.payload.is_empty());

    service.shutdown().await;
}

#[tokio::test]
async fn test_silent_destination_maps_to_504() {
    let mut server = FakeCoapServer::start(Behaviour::Silent).await;
    let budget = Duration::from_millis(300);
    let service = gateway_for(&server, budget).await;

    let started = Instant::now();
    let (status, headers, _body) = call(&service, "POST", "/actuators/relay", b"on").await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() >= budget);
    assert!(headers.get("x-coap-message-id").is_none());
    assert!(headers.get("x-coap-response-code").is_none());

    let request = server.next_packet().await;
    assert_eq!(request.header.code, MessageClass::Request(RequestType::Post));
    assert_eq!(request.payload, b"on");
    assert_eq!(
        option_strings(&request, CoapOption::UriPath),
        vec!["actuators", "relay"]
    );

    // Nothing left behind in the correlation table
    assert!(service.correlation_table().is_empty());
    service.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_method_sends_no_packet() {
    let mut server = FakeCoapServer::start(Behaviour::Silent).await;
    let service = gateway_for(&server, Duration::from_secs(5)).await;

    let (status, headers, _body) = call(&service, "PATCH", "/x", b"").await;

    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
    assert!(headers.get("x-coap-message-id").is_none());
    server.assert_silent(Duration::from_millis(200)).await;

    service.shutdown().await;
}

#[tokio::test]
async fn test_not_found_maps_to_404_with_empty_body() {
    let mut server =
        FakeCoapServer::start(Behaviour::Piggybacked(Reply::new(ResponseType::NotFound))).await;
    let service = gateway_for(&server, Duration::from_secs(5)).await;

    let (status, headers, body) = call(&service, "GET", "/missing", b"").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
    assert_eq!(headers["x-coap-response-code"], "4.04");
    assert!(headers.contains_key("x-coap-message-id"));
    assert!(headers.get("content-type").is_none());

    let _ = server.next_packet().await;
    service.shutdown().await;
}

// =============================================================================
// BEYOND THE BASIC SCENARIOS
// =============================================================================

#[tokio::test]
async fn test_separate_response_is_acknowledged_and_delivered() {
    let mut server = FakeCoapServer::start(Behaviour::Separate(
        Reply::new(ResponseType::Content).with_content(JSON, b"[1,2]"),
    ))
    .await;
    let service = gateway_for(&server, Duration::from_secs(5)).await;

    let (status, headers, body) = call(&service, "GET", "/slow", b"").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"[1,2]");
    assert_eq!(headers["content-type"], "application/json");

    let request = server.next_packet().await;
    assert!(matches!(request.header.code, MessageClass::Request(_)));

    // The confirmable separate response must be acknowledged by the gateway
    let ack = server.next_packet().await;
    assert_eq!(ack.header.get_type(), MessageType::Acknowledgement);
    assert_eq!(ack.header.code, MessageClass::Empty);
    // First id the fake server hands out for separate responses
    assert_eq!(ack.header.message_id, 0x4001);

    service.shutdown().await;
}

#[tokio::test]
async fn test_percent_encoded_path_and_query_become_options() {
    let mut server = FakeCoapServer::start(Behaviour::Piggybacked(
        Reply::new(ResponseType::Content).with_content(0, b"ok"),
    ))
    .await;
    let service = gateway_for(&server, Duration::from_secs(5)).await;

    let (status, headers, _body) =
        call(&service, "GET", "/living%20room/lamp?unit=c&fmt=j%26s", b"").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "text/plain");

    let request = server.next_packet().await;
    assert_eq!(
        option_strings(&request, CoapOption::UriPath),
        vec!["living room", "lamp"]
    );
    assert_eq!(
        option_strings(&request, CoapOption::UriQuery),
        vec!["unit=c", "fmt=j&s"]
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated_independently() {
    let server = FakeCoapServer::start(Behaviour::Piggybacked(
        Reply::new(ResponseType::Created),
    ))
    .await;
    let service = gateway_for(&server, Duration::from_secs(5)).await;

    let calls = (0..8).map(|i| {
        let router = service.router();
        tokio::spawn(async move {
            router
                .oneshot(
                    Request::builder()
                        .method("PUT")
                        .uri(format!("/led/{i}"))
                        .body(Body::from("1"))
                        .unwrap(),
                )
                .await
                .unwrap()
        })
    });

    let mut ids = Vec::new();
    for handle in calls.collect::<Vec<_>>() {
        let response = handle.await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        ids.push(response.headers()["x-coap-message-id"].to_str().unwrap().to_string());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    service.shutdown().await;
}

#[tokio::test]
async fn test_requests_after_shutdown_are_refused() {
    let server = FakeCoapServer::start(Behaviour::Silent).await;
    let service = gateway_for(&server, Duration::from_secs(5)).await;

    service.shutdown().await;
    let (status, _headers, _body) = call(&service, "GET", "/late", b"").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
