//! Request/response telemetry: correlation, snapshot capture, Kafka publishing.

pub mod correlation;
pub mod host;
pub mod pipeline;
pub mod publisher;
pub mod settings;
pub mod snapshot;
