//! Buffered forwarding to the upstream service.
//!
//! Both bodies are read fully so the telemetry hooks can see them alongside
//! the headers.

use std::time::Instant;

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use tracing::Instrument;

use super::exchange::InboundRequest;

/// Headers that should NOT be forwarded (hop-by-hop headers).
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
}

/// A fully buffered upstream response.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Why no upstream response is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    Timeout,
    Unreachable,
}

impl UpstreamFailure {
    pub fn status(self) -> StatusCode {
        match self {
            UpstreamFailure::Timeout => StatusCode::GATEWAY_TIMEOUT,
            UpstreamFailure::Unreachable => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            UpstreamFailure::Timeout => "upstream timeout",
            UpstreamFailure::Unreachable => "upstream connection error",
        }
    }
}

#[derive(Debug)]
pub enum UpstreamOutcome {
    Received(UpstreamResponse),
    Failed(UpstreamFailure),
}

/// Forward the request (with any headers the request hook set) and buffer the
/// response.
pub async fn forward(
    client: &reqwest::Client,
    base_url: &str,
    request: &InboundRequest,
) -> UpstreamOutcome {
    let url = format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        request.path_and_query()
    );
    let span = logger_tracing::upstream_forward_span!(request.method(), &url);
    let start = Instant::now();

    async {
        let mut req_builder = client
            .request(request.method().clone(), &url)
            .body(request.body().clone());

        for (name, value) in request.upstream_headers().iter() {
            if is_hop_by_hop(name.as_str()) || name.as_str() == "content-length" {
                continue;
            }
            req_builder = req_builder.header(name, value);
        }

        let outcome = match req_builder.send().await {
            Ok(resp) => {
                let status = resp.status();
                let headers = resp.headers().clone();
                match resp.bytes().await {
                    Ok(body) => UpstreamOutcome::Received(UpstreamResponse {
                        status,
                        headers,
                        body,
                    }),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read upstream response body");
                        UpstreamOutcome::Failed(failure_kind(&e))
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Upstream request failed");
                UpstreamOutcome::Failed(failure_kind(&e))
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        tracing::Span::current().record("latency_ms", latency);
        let status = match &outcome {
            UpstreamOutcome::Received(resp) => resp.status,
            UpstreamOutcome::Failed(failure) => failure.status(),
        };
        tracing::Span::current().record("status", status.as_u16());
        tracing::info!(status = status.as_u16(), latency_ms = latency, "Forward complete");

        outcome
    }
    .instrument(span)
    .await
}

fn failure_kind(e: &reqwest::Error) -> UpstreamFailure {
    if e.is_timeout() {
        UpstreamFailure::Timeout
    } else {
        UpstreamFailure::Unreachable
    }
}
