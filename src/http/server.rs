//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the ingress and health handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Serve until the shutdown coordinator fires

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::PipelineConfig;
use crate::envelope::Stage;
use crate::http::request::{ingress_request, invocation_context};
use crate::lifecycle::Shutdown;
use crate::stages::{IngressResponse, IngressStage};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<IngressStage>,
}

/// HTTP front of the ingress stage.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &PipelineConfig, ingress: Arc<IngressStage>) -> Self {
        Self {
            router: build_router(config, AppState { ingress }),
        }
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
///
/// A request still running after `timeouts.request_secs` is answered with 408.
pub fn build_router(config: &PipelineConfig, state: AppState) -> Router {
    Router::new()
        .route("/trace", post(trace_handler))
        .route("/", post(trace_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.timeouts.request_secs),
        ))
        .layer(RequestBodyLimitLayer::new(config.ingress.max_body_size))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn trace_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> IngressResponse {
    let ctx = invocation_context(&headers, Stage::Ingress.service_name());
    let request = ingress_request(&method, &uri, &headers, body);
    state.ingress.respond(request, &ctx).await
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
