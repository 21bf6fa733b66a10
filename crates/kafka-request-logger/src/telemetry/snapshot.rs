//! Request and response snapshots, and the JSON envelope published for them.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::host::{observe, RequestPhase, ResponsePhase};

/// Maximum header entries observed per retrieval.
pub const MAX_HEADERS: usize = 99;

/// Which hook produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Request,
    Response,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Request => f.write_str("request"),
            Phase::Response => f.write_str("response"),
        }
    }
}

/// One header name's value(s). A repeated header serializes as an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeaderValues {
    Single(String),
    Multiple(Vec<String>),
}

impl HeaderValues {
    fn push(&mut self, value: String) {
        match self {
            HeaderValues::Single(first) => {
                let first = std::mem::take(first);
                *self = HeaderValues::Multiple(vec![first, value]);
            }
            HeaderValues::Multiple(values) => values.push(value),
        }
    }
}

pub type Headers = BTreeMap<String, HeaderValues>;

/// Group `(name, value)` pairs by name, observing at most `limit` pairs.
pub fn collect_headers<I, N, V>(pairs: I, limit: usize) -> Headers
where
    I: IntoIterator<Item = (N, V)>,
    N: Into<String>,
    V: Into<String>,
{
    let mut headers = Headers::new();
    for (name, value) in pairs.into_iter().take(limit) {
        let value = value.into();
        match headers.entry(name.into()) {
            Entry::Occupied(mut existing) => existing.get_mut().push(value),
            Entry::Vacant(slot) => {
                slot.insert(HeaderValues::Single(value));
            }
        }
    }
    headers
}

/// Fields captured at the request phase.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFields {
    pub path: Option<String>,
    pub http_protocol: Option<String>,
    pub http_method: Option<String>,
    #[serde(serialize_with = "serialize_body")]
    pub body: Option<Bytes>,
    pub headers: Option<Headers>,
}

/// Fields captured at the response phase.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFields {
    pub path: Option<String>,
    pub status_code: Option<u16>,
    #[serde(serialize_with = "serialize_body")]
    pub body: Option<Bytes>,
    pub headers: Option<Headers>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capture {
    Request(RequestFields),
    Response(ResponseFields),
}

/// The published record: `{"trace-id", "request" | "response", "date"}`.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    #[serde(rename = "trace-id")]
    pub correlation_id: String,
    #[serde(flatten)]
    pub capture: Capture,
    pub date: DateTime<Utc>,
}

impl Snapshot {
    pub fn phase(&self) -> Phase {
        match self.capture {
            Capture::Request(_) => Phase::Request,
            Capture::Response(_) => Phase::Response,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Bodies are published as text; invalid UTF-8 sequences are replaced.
fn serialize_body<S: Serializer>(body: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
    match body {
        Some(bytes) => serializer.serialize_str(&String::from_utf8_lossy(bytes)),
        None => serializer.serialize_none(),
    }
}

impl RequestFields {
    /// Read every request-phase field. `path` was already fetched by the caller.
    pub fn capture<H: RequestPhase + ?Sized>(host: &H, path: Option<String>) -> Self {
        Self {
            path,
            http_protocol: observe("scheme", host.scheme()),
            http_method: observe("method", host.method()),
            body: observe("body", host.raw_body()),
            headers: observe("headers", host.headers(MAX_HEADERS)),
        }
    }
}

impl ResponseFields {
    /// Read every response-phase field. `path` was already fetched by the caller.
    pub fn capture<H: ResponsePhase + ?Sized>(host: &H, path: Option<String>) -> Self {
        Self {
            path,
            status_code: observe("status", host.upstream_status()),
            body: observe("body", host.upstream_body()),
            headers: observe("headers", host.response_headers(MAX_HEADERS)),
        }
    }
}
