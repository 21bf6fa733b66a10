//! Axum HTTP server: router, listener, graceful shutdown.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::proxy::exchange::{InboundRequest, UpstreamExchange};
use crate::proxy::upstream;
use crate::stats::StatsSnapshot;
use crate::telemetry::pipeline::Pipeline;
use crate::telemetry::publisher::MessageSink;

/// Shared application state.
pub struct AppState<S> {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
    pub pipeline: Pipeline<S>,
}

pub fn router<S: MessageSink>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/stats", get(handle_stats::<S>))
        .fallback(handle_proxy::<S>)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Build and run the HTTP server.
pub async fn run<S: MessageSink>(state: AppState<S>) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "kafka-request-logger listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("kafka-request-logger shut down gracefully");
    Ok(())
}

/// Catch-all proxy handler.
///
/// 1. Buffer the client request
/// 2. Request hook (correlation id set upstream, request snapshot dispatched)
/// 3. Forward upstream and buffer the response
/// 4. Response hook (correlation id echoed, response snapshot dispatched)
/// 5. Return the upstream response unchanged apart from the hook's header
async fn handle_proxy<S: MessageSink>(
    State(state): State<Arc<AppState<S>>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.config.upstream.max_body_bytes).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
        }
    };

    let mut inbound = InboundRequest::new(parts.method, &parts.uri, parts.headers, body);
    state.pipeline.on_request(&mut inbound);

    let outcome = upstream::forward(&state.client, &state.config.upstream.url, &inbound).await;

    let mut exchange = UpstreamExchange::new(&inbound, outcome);
    state.pipeline.on_response(&mut exchange);

    exchange.into_response()
}

async fn handle_stats<S: MessageSink>(State(state): State<Arc<AppState<S>>>) -> Json<StatsSnapshot> {
    Json(state.pipeline.dispatcher().stats().snapshot())
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, draining connections...");
}
