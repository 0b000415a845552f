//! HTTP API for the pipeline server
//!
//! - `GET /v1/events` - SSE stream of object lines and heartbeats
//! - `GET /ping` - Liveness check
//! - `GET /version` - Server version
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics

pub mod events;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use pipeline_core::{PipelineMetrics, SubscriberRegistry};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Connected SSE subscribers
    pub registry: Arc<SubscriberRegistry>,
    /// Pipeline metrics
    pub metrics: Arc<PipelineMetrics>,
    /// Service configuration
    pub config: Arc<Config>,
    /// Cancelled on shutdown; ends open event streams
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        metrics: Arc<PipelineMetrics>,
        config: Arc<Config>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            metrics,
            config,
            shutdown,
        }
    }
}

/// Build the HTTP API router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/events", get(events::events_stream))
        .route("/ping", get(ping))
        .route("/version", get(version))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
