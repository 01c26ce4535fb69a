//! Ingress over HTTP: routing, response shape and server lifecycle.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;

use trace_relay::envelope::Envelope;
use trace_relay::http::{build_router, AppState, HttpServer};
use trace_relay::lifecycle::Shutdown;
use trace_relay::propagation::{CarriedContext, TRACEPARENT};
use trace_relay::stages::IngressStage;
use trace_relay::transport::{MemoryQueue, QueueTransport};

fn router_with(queue: Arc<dyn QueueTransport>) -> axum::Router {
    let config = common::test_config();
    let (tracer, _) = common::capturing_tracer("ingress");
    let ingress = Arc::new(IngressStage::new(&config, tracer, queue));
    build_router(&config, AppState { ingress })
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_post_trace_continues_header_context() {
    let queue = MemoryQueue::new();
    let app = router_with(Arc::new(queue.clone()));
    let upstream = CarriedContext::originate();

    let response = app
        .oneshot(
            Request::post("/trace")
                .header(TRACEPARENT, upstream.traceparent())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"message":"hi"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();

    let body = json_body(response).await;
    assert_eq!(body["traceId"], upstream.trace_id.to_string());
    assert_eq!(body["message"], "Message sent to queue successfully");

    let messages = queue.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(body["messageId"], messages[0].message_id);
    let envelope = Envelope::parse(&messages[0].body).unwrap();
    assert_eq!(envelope.ingress_result().unwrap().request_id, request_id);
}

#[tokio::test]
async fn test_root_path_accepts_posts() {
    let queue = MemoryQueue::new();
    let app = router_with(Arc::new(queue.clone()));

    let response = app
        .oneshot(Request::post("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(queue.messages().len(), 1);
}

#[tokio::test]
async fn test_enqueue_failure_returns_500() {
    let app = router_with(Arc::new(common::RejectingQueue));

    let response = app
        .oneshot(
            Request::post("/trace")
                .body(Body::from(r#"{"message":"hi"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let body = json_body(response).await;
    assert_eq!(body["error"], "Internal server error");
    assert!(body["message"].as_str().unwrap().contains("queue does not exist"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_request_times_out() {
    let mut config = common::test_config();
    config.timeouts.handoff_ms = 60_000;
    config.timeouts.request_secs = 1;
    let (tracer, _) = common::capturing_tracer("ingress");
    let ingress = Arc::new(IngressStage::new(&config, tracer, Arc::new(common::PendingQueue)));
    let app = build_router(&config, AppState { ingress });

    let response = app
        .oneshot(
            Request::post("/trace")
                .body(Body::from(r#"{"message":"hi"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
}

#[tokio::test]
async fn test_health() {
    let app = router_with(Arc::new(MemoryQueue::new()));

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn test_server_serves_until_shutdown() {
    let config = common::test_config();
    let (tracer, _) = common::capturing_tracer("ingress");
    let queue = MemoryQueue::new();
    let ingress = Arc::new(IngressStage::new(&config, tracer, Arc::new(queue.clone())));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = tokio::spawn(HttpServer::new(&config, ingress).run(listener, shutdown.clone()));

    let response = reqwest::Client::new()
        .post(format!("http://{}/trace", addr))
        .body(r#"{"message":"over tcp"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(queue.messages().len(), 1);

    shutdown.trigger();
    server.await.unwrap().unwrap();
}
