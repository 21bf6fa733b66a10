//! Accessors the proxy engine exposes to the pipeline at each phase.
//!
//! Every getter may fail independently. The pipeline records a failed getter
//! as an absent field and carries on.

use bytes::Bytes;
use thiserror::Error;

use super::snapshot::Headers;

/// A host-side field retrieval or header write failed.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("{0} is not available in this phase")]
    Unavailable(&'static str),

    #[error("header {name} is not valid UTF-8")]
    NotUtf8 { name: String },

    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),

    #[error("invalid value for header {0}")]
    InvalidHeaderValue(String),
}

/// Accessors available after the request is received, before it is forwarded.
pub trait RequestPhase {
    /// Inbound request header. `Ok(None)` when the header is not present.
    fn header(&self, name: &str) -> Result<Option<String>, HostError>;

    /// Set a header on the request that travels upstream.
    fn set_upstream_header(&mut self, name: &str, value: &str) -> Result<(), HostError>;

    fn raw_body(&self) -> Result<Bytes, HostError>;

    fn path(&self) -> Result<String, HostError>;

    fn method(&self) -> Result<String, HostError>;

    fn scheme(&self) -> Result<String, HostError>;

    /// At most `max` header entries; the rest are not observed.
    fn headers(&self, max: usize) -> Result<Headers, HostError>;
}

/// Accessors available after the upstream response is received, before it is
/// returned to the client.
pub trait ResponsePhase {
    /// Header of the request as it was forwarded upstream.
    fn header(&self, name: &str) -> Result<Option<String>, HostError>;

    /// Set a header on the response returned to the client.
    fn set_response_header(&mut self, name: &str, value: &str) -> Result<(), HostError>;

    fn path(&self) -> Result<String, HostError>;

    fn upstream_body(&self) -> Result<Bytes, HostError>;

    fn upstream_status(&self) -> Result<u16, HostError>;

    /// At most `max` header entries of the client-facing response.
    fn response_headers(&self, max: usize) -> Result<Headers, HostError>;
}

/// Turn a getter result into an optional field, logging failures.
pub(crate) fn observe<T>(field: &'static str, result: Result<T, HostError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(field, error = %e, "Host accessor failed, recording field as absent");
            None
        }
    }
}
