//! Inbound response types.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::Stream;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;

use crate::engine::{EngineError, ErrorCode, UrlResponseInfo};
use crate::error::{BridgeError, Result};

/// The HTTP protocol version a response was received over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVersion {
    /// HTTP/1.1, also used for any unrecognized protocol label.
    #[default]
    Http11,
    /// HTTP/2.
    Http2,
    /// HTTP/3 over QUIC.
    Http3,
    /// Legacy SPDY/3 over QUIC.
    Spdy3,
}

impl ProtocolVersion {
    /// Map an engine's negotiated protocol label to a version.
    ///
    /// Unknown labels, including an empty one, fall back to HTTP/1.1.
    ///
    /// ```
    /// use horizon_lattice_transport::ProtocolVersion;
    ///
    /// assert_eq!(ProtocolVersion::from_negotiated("h3"), ProtocolVersion::Http3);
    /// assert_eq!(ProtocolVersion::from_negotiated("spdy/2"), ProtocolVersion::Http11);
    /// ```
    pub fn from_negotiated(label: &str) -> Self {
        match label {
            "h2" => Self::Http2,
            "h3" => Self::Http3,
            "quic/1+spdy/3" => Self::Spdy3,
            _ => Self::Http11,
        }
    }

    /// The equivalent `http` crate version. SPDY has none.
    pub fn to_http_version(self) -> Option<http::Version> {
        match self {
            Self::Http11 => Some(http::Version::HTTP_11),
            Self::Http2 => Some(http::Version::HTTP_2),
            Self::Http3 => Some(http::Version::HTTP_3),
            Self::Spdy3 => None,
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http11 => write!(f, "HTTP/1.1"),
            Self::Http2 => write!(f, "HTTP/2.0"),
            Self::Http3 => write!(f, "HTTP/3"),
            Self::Spdy3 => write!(f, "SPDY/3"),
        }
    }
}

/// A response body that can be consumed once.
///
/// The body is fully received before the call completes; it is handed out
/// as a single-pass sequence of chunks and cannot be restarted.
#[derive(Debug, Default)]
pub struct ResponseBody {
    data: Option<Bytes>,
}

impl ResponseBody {
    pub(crate) fn new(data: Bytes) -> Self {
        Self { data: Some(data) }
    }

    /// An empty body.
    pub fn empty() -> Self {
        Self::new(Bytes::new())
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }

    /// Whether the body has been consumed.
    pub fn is_consumed(&self) -> bool {
        self.data.is_none()
    }

    /// Take the next chunk. Returns `None` once the body is consumed.
    pub fn next_chunk(&mut self) -> Option<Bytes> {
        self.data.take()
    }

    /// Collect the remaining bytes.
    pub fn bytes(mut self) -> Bytes {
        self.next_chunk().unwrap_or_default()
    }

    /// Collect the remaining bytes as UTF-8 text.
    pub fn text(self) -> Result<String> {
        String::from_utf8(self.bytes().to_vec())
            .map_err(|e| BridgeError::body(format!("response body is not UTF-8: {e}")))
    }

    /// Parse the remaining bytes as JSON.
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_slice(&self.bytes())?)
    }
}

impl Stream for ResponseBody {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.next_chunk())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let chunks = usize::from(self.data.is_some());
        (chunks, Some(chunks))
    }
}

/// A response produced by the bridge.
///
/// Created on terminal success, or from the redirect response itself when
/// redirects are not followed. Never mutated after creation except for
/// consuming its body.
pub struct InboundResponse {
    status: StatusCode,
    headers: HeaderMap,
    version: ProtocolVersion,
    url: String,
    was_cached: bool,
    request_time: SystemTime,
    response_time: SystemTime,
    body: ResponseBody,
}

impl InboundResponse {
    /// Build a response from engine metadata and a received body.
    pub(crate) fn from_info(
        info: &UrlResponseInfo,
        request_time: SystemTime,
        body: Bytes,
    ) -> Result<Self> {
        let status = StatusCode::from_u16(info.http_status_code).map_err(|_| {
            EngineError::new(
                ErrorCode::Other,
                format!("engine reported invalid status code {}", info.http_status_code),
            )
        })?;

        let version = ProtocolVersion::from_negotiated(&info.negotiated_protocol);
        tracing::trace!(
            target: "horizon_lattice_transport::response",
            protocol = %info.negotiated_protocol,
            %version,
            "negotiated protocol"
        );

        Ok(Self {
            status,
            headers: header_map(&info.all_headers),
            version,
            url: info.url.clone(),
            was_cached: info.was_cached,
            request_time,
            response_time: SystemTime::now(),
            body: ResponseBody::new(body),
        })
    }

    /// The HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the status is 3xx.
    pub fn is_redirection(&self) -> bool {
        self.status.is_redirection()
    }

    /// The response headers, in the order the engine delivered them.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The first value of a header, if it is valid UTF-8.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// The `Content-Type` header value.
    pub fn content_type(&self) -> Option<&str> {
        self.header(http::header::CONTENT_TYPE.as_str())
    }

    /// The negotiated protocol version.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// The URL the response came from.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the engine served the response from its cache.
    pub fn was_cached(&self) -> bool {
        self.was_cached
    }

    /// When the request was dispatched.
    pub fn request_time(&self) -> SystemTime {
        self.request_time
    }

    /// When the response was completed.
    pub fn response_time(&self) -> SystemTime {
        self.response_time
    }

    /// Mutable access to the body, for chunk-wise consumption.
    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    /// Take the body.
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Collect the body bytes.
    pub fn bytes(self) -> Bytes {
        self.body.bytes()
    }

    /// Collect the body as UTF-8 text.
    pub fn text(self) -> Result<String> {
        self.body.text()
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        self.body.json()
    }
}

impl std::fmt::Debug for InboundResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &self.url)
            .field("body_len", &self.body.remaining())
            .finish()
    }
}

fn header_map(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => {
                tracing::warn!(
                    target: "horizon_lattice_transport::response",
                    header = %name,
                    "dropping malformed response header"
                );
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_protocol_mapping() {
        assert_eq!(ProtocolVersion::from_negotiated("h2"), ProtocolVersion::Http2);
        assert_eq!(ProtocolVersion::from_negotiated("h3"), ProtocolVersion::Http3);
        assert_eq!(
            ProtocolVersion::from_negotiated("quic/1+spdy/3"),
            ProtocolVersion::Spdy3
        );
        assert_eq!(ProtocolVersion::from_negotiated("http/1.1"), ProtocolVersion::Http11);
        assert_eq!(ProtocolVersion::from_negotiated(""), ProtocolVersion::Http11);
        assert_eq!(ProtocolVersion::from_negotiated("h9"), ProtocolVersion::Http11);
    }

    #[test]
    fn test_http_version() {
        assert_eq!(
            ProtocolVersion::Http3.to_http_version(),
            Some(http::Version::HTTP_3)
        );
        assert_eq!(ProtocolVersion::Spdy3.to_http_version(), None);
    }

    #[test]
    fn test_headers_preserve_order_per_key() {
        let info = UrlResponseInfo::new("https://example.com", 200)
            .with_header("Set-Cookie", "a=1")
            .with_header("Content-Type", "text/plain")
            .with_header("set-cookie", "b=2")
            .with_header("bad header", "x");

        let response =
            InboundResponse::from_info(&info, SystemTime::now(), Bytes::new()).unwrap();
        let cookies: Vec<_> = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(response.content_type(), Some("text/plain"));
        assert_eq!(response.headers().len(), 3);
    }

    #[test]
    fn test_invalid_status_is_transport_error() {
        let info = UrlResponseInfo::new("https://example.com", 42);
        let err = InboundResponse::from_info(&info, SystemTime::now(), Bytes::new()).unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }

    #[test]
    fn test_body_single_pass() {
        let mut body = ResponseBody::new(Bytes::from_static(b"hello"));
        assert_eq!(body.remaining(), 5);
        assert_eq!(body.next_chunk(), Some(Bytes::from_static(b"hello")));
        assert!(body.is_consumed());
        assert_eq!(body.next_chunk(), None);
        assert!(body.bytes().is_empty());
    }

    #[tokio::test]
    async fn test_body_stream() {
        let body = ResponseBody::new(Bytes::from_static(b"chunk"));
        let chunks: Vec<Bytes> = body.collect().await;
        assert_eq!(chunks, vec![Bytes::from_static(b"chunk")]);
    }

    #[test]
    fn test_text_and_json() {
        let body = ResponseBody::new(Bytes::from_static(b"{\"ok\":true}"));
        let value: serde_json::Value = body.json().unwrap();
        assert_eq!(value["ok"], true);

        let invalid = ResponseBody::new(Bytes::from_static(&[0xff, 0xfe]));
        assert!(matches!(invalid.text(), Err(BridgeError::Body(_))));
    }
}
