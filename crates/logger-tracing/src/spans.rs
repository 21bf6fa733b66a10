//! Span builder helpers for kafka-request-logger instrumentation.

/// Create a tracing span for one pipeline phase call.
///
/// Usage: `let _span = phase_span!("request").entered();`
///
/// `correlation_id` is recorded once the resolver has run; `minted` tells
/// whether the id was generated here rather than taken from the header.
#[macro_export]
macro_rules! phase_span {
    ($phase:expr) => {
        tracing::info_span!(
            "pipeline_phase",
            phase = %$phase,
            correlation_id = tracing::field::Empty,
            minted = tracing::field::Empty,
            topic = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for a detached publish task.
#[macro_export]
macro_rules! publish_span {
    ($correlation_id:expr, $phase:expr, $topic:expr) => {
        tracing::info_span!(
            "publish",
            correlation_id = %$correlation_id,
            phase = %$phase,
            topic = %$topic,
            payload_bytes = tracing::field::Empty,
            partition = tracing::field::Empty,
            offset = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for the upstream forward.
#[macro_export]
macro_rules! upstream_forward_span {
    ($method:expr, $url:expr) => {
        tracing::info_span!(
            "upstream_forward",
            method = %$method,
            url = %$url,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}
