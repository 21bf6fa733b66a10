//! Phase accessors over a buffered HTTP exchange.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use super::upstream::{is_hop_by_hop, UpstreamOutcome};
use crate::telemetry::host::{HostError, RequestPhase, ResponsePhase};
use crate::telemetry::snapshot::{collect_headers, Headers};

/// The client request, plus the header set that will be forwarded upstream.
#[derive(Debug)]
pub struct InboundRequest {
    method: Method,
    path: String,
    query: Option<String>,
    scheme: String,
    headers: HeaderMap,
    upstream_headers: HeaderMap,
    body: Bytes,
}

impl InboundRequest {
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) -> Self {
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| uri.scheme_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());

        Self {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            scheme,
            upstream_headers: headers.clone(),
            headers,
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    pub fn upstream_headers(&self) -> &HeaderMap {
        &self.upstream_headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl RequestPhase for InboundRequest {
    fn header(&self, name: &str) -> Result<Option<String>, HostError> {
        read_header(&self.headers, name)
    }

    fn set_upstream_header(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        let (name, value) = parse_header(name, value)?;
        self.upstream_headers.insert(name, value);
        Ok(())
    }

    fn raw_body(&self) -> Result<Bytes, HostError> {
        Ok(self.body.clone())
    }

    fn path(&self) -> Result<String, HostError> {
        Ok(self.path.clone())
    }

    fn method(&self) -> Result<String, HostError> {
        Ok(self.method.to_string())
    }

    fn scheme(&self) -> Result<String, HostError> {
        Ok(self.scheme.clone())
    }

    fn headers(&self, max: usize) -> Result<Headers, HostError> {
        Ok(header_map_snapshot(&self.headers, max))
    }
}

/// The upstream result for one request and the headers the client will get.
pub struct UpstreamExchange<'a> {
    request: &'a InboundRequest,
    outcome: UpstreamOutcome,
    response_headers: HeaderMap,
}

impl<'a> UpstreamExchange<'a> {
    pub fn new(request: &'a InboundRequest, mut outcome: UpstreamOutcome) -> Self {
        let mut response_headers = HeaderMap::new();
        if let UpstreamOutcome::Received(resp) = &mut outcome {
            for (name, value) in std::mem::take(&mut resp.headers).iter() {
                if is_hop_by_hop(name.as_str()) || name.as_str() == "content-length" {
                    continue;
                }
                response_headers.append(name.clone(), value.clone());
            }
        }

        Self {
            request,
            outcome,
            response_headers,
        }
    }

    pub fn status(&self) -> StatusCode {
        match &self.outcome {
            UpstreamOutcome::Received(resp) => resp.status,
            UpstreamOutcome::Failed(failure) => failure.status(),
        }
    }
}

impl ResponsePhase for UpstreamExchange<'_> {
    fn header(&self, name: &str) -> Result<Option<String>, HostError> {
        read_header(&self.request.upstream_headers, name)
    }

    fn set_response_header(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        let (name, value) = parse_header(name, value)?;
        self.response_headers.insert(name, value);
        Ok(())
    }

    fn path(&self) -> Result<String, HostError> {
        Ok(self.request.path.clone())
    }

    fn upstream_body(&self) -> Result<Bytes, HostError> {
        match &self.outcome {
            UpstreamOutcome::Received(resp) => Ok(resp.body.clone()),
            UpstreamOutcome::Failed(_) => Err(HostError::Unavailable("upstream body")),
        }
    }

    fn upstream_status(&self) -> Result<u16, HostError> {
        match &self.outcome {
            UpstreamOutcome::Received(resp) => Ok(resp.status.as_u16()),
            UpstreamOutcome::Failed(_) => Err(HostError::Unavailable("upstream status")),
        }
    }

    fn response_headers(&self, max: usize) -> Result<Headers, HostError> {
        Ok(header_map_snapshot(&self.response_headers, max))
    }
}

impl IntoResponse for UpstreamExchange<'_> {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self.outcome {
            UpstreamOutcome::Received(resp) => Body::from(resp.body),
            UpstreamOutcome::Failed(failure) => Body::from(failure.message()),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = self.response_headers;
        response
    }
}

fn read_header(headers: &HeaderMap, name: &str) -> Result<Option<String>, HostError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| HostError::NotUtf8 {
                    name: name.to_string(),
                })
        })
        .transpose()
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HostError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| HostError::InvalidHeaderName(name.to_string()))?;
    let header_value =
        HeaderValue::from_str(value).map_err(|_| HostError::InvalidHeaderValue(name.to_string()))?;
    Ok((header_name, header_value))
}

fn header_map_snapshot(headers: &HeaderMap, max: usize) -> Headers {
    collect_headers(
        headers.iter().map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        }),
        max,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::upstream::{UpstreamFailure, UpstreamResponse};
    use crate::telemetry::snapshot::{HeaderValues, MAX_HEADERS};

    fn inbound(headers: &[(&str, &str)]) -> InboundRequest {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        let uri: Uri = "/orders?page=2".parse().unwrap();
        InboundRequest::new(Method::POST, &uri, map, Bytes::from_static(b"{}"))
    }

    #[test]
    fn test_request_accessors() {
        let request = inbound(&[("x-forwarded-proto", "https"), ("x", "y")]);
        assert_eq!(RequestPhase::path(&request).unwrap(), "/orders");
        assert_eq!(request.path_and_query(), "/orders?page=2");
        assert_eq!(RequestPhase::method(&request).unwrap(), "POST");
        assert_eq!(request.scheme().unwrap(), "https");
        assert_eq!(RequestPhase::header(&request, "x").unwrap().as_deref(), Some("y"));
        assert_eq!(RequestPhase::header(&request, "missing").unwrap(), None);
    }

    #[test]
    fn test_scheme_defaults_to_http() {
        assert_eq!(inbound(&[]).scheme().unwrap(), "http");
    }

    #[test]
    fn test_set_upstream_header_leaves_client_headers_alone() {
        let mut request = inbound(&[]);
        request.set_upstream_header("trace-id", "minted").unwrap();

        assert_eq!(RequestPhase::header(&request, "trace-id").unwrap(), None);
        assert_eq!(request.upstream_headers().get("trace-id").unwrap(), "minted");
    }

    #[test]
    fn test_invalid_header_name_is_an_error() {
        let mut request = inbound(&[]);
        assert!(matches!(
            request.set_upstream_header("bad header", "v"),
            Err(HostError::InvalidHeaderName(_))
        ));
    }

    #[test]
    fn test_header_snapshot_truncates() {
        let names: Vec<String> = (0..120).map(|i| format!("x-h{i}")).collect();
        let pairs: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "v")).collect();
        let request = inbound(&pairs);

        let headers = request.headers(MAX_HEADERS).unwrap();
        assert_eq!(headers.len(), MAX_HEADERS);
    }

    #[test]
    fn test_response_phase_reads_forwarded_header() {
        let mut request = inbound(&[]);
        request.set_upstream_header("trace-id", "abc-123").unwrap();

        let mut upstream_headers = HeaderMap::new();
        upstream_headers.insert("content-type", HeaderValue::from_static("text/plain"));
        upstream_headers.insert("connection", HeaderValue::from_static("keep-alive"));
        let outcome = UpstreamOutcome::Received(UpstreamResponse {
            status: StatusCode::NOT_FOUND,
            headers: upstream_headers,
            body: Bytes::from_static(b"not found"),
        });

        let mut exchange = UpstreamExchange::new(&request, outcome);
        assert_eq!(
            ResponsePhase::header(&exchange, "trace-id").unwrap().as_deref(),
            Some("abc-123")
        );
        assert_eq!(exchange.upstream_status().unwrap(), 404);
        assert_eq!(exchange.upstream_body().unwrap(), Bytes::from_static(b"not found"));

        exchange.set_response_header("trace-id", "abc-123").unwrap();
        let headers = exchange.response_headers(MAX_HEADERS).unwrap();
        assert_eq!(
            headers.get("trace-id"),
            Some(&HeaderValues::Single("abc-123".to_string()))
        );
        assert!(!headers.contains_key("connection"));

        let response = exchange.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("trace-id").unwrap(), "abc-123");
    }

    #[test]
    fn test_failed_upstream_hides_status_and_body() {
        let request = inbound(&[]);
        let exchange = UpstreamExchange::new(
            &request,
            UpstreamOutcome::Failed(UpstreamFailure::Unreachable),
        );

        assert!(exchange.upstream_status().is_err());
        assert!(exchange.upstream_body().is_err());
        assert_eq!(exchange.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
