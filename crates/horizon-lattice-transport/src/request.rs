//! Outbound request types and builder.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use tokio::io::AsyncRead;
use url::Url;

use crate::body::{ContentType, OutgoingBody};
use crate::error::{BridgeError, Result};

/// A request ready to be executed by the bridge.
///
/// Dispatch takes the request by value, so it cannot change once a call is
/// in flight.
#[derive(Debug)]
pub struct OutboundRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: OutgoingBody,
}

impl OutboundRequest {
    /// Create a request without headers or body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: OutgoingBody::None,
        }
    }

    /// Start building a request.
    pub fn builder(method: Method, url: impl AsRef<str>) -> OutboundRequestBuilder {
        OutboundRequestBuilder::new(method, url.as_ref())
    }

    /// Start building a GET request.
    pub fn get(url: impl AsRef<str>) -> OutboundRequestBuilder {
        Self::builder(Method::GET, url)
    }

    /// Start building a POST request.
    pub fn post(url: impl AsRef<str>) -> OutboundRequestBuilder {
        Self::builder(Method::POST, url)
    }

    /// Start building a PUT request.
    pub fn put(url: impl AsRef<str>) -> OutboundRequestBuilder {
        Self::builder(Method::PUT, url)
    }

    /// Start building a DELETE request.
    pub fn delete(url: impl AsRef<str>) -> OutboundRequestBuilder {
        Self::builder(Method::DELETE, url)
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request body.
    pub fn body(&self) -> &OutgoingBody {
        &self.body
    }

    pub(crate) fn into_parts(self) -> (Method, Url, HeaderMap, OutgoingBody) {
        (self.method, self.url, self.headers, self.body)
    }
}

/// Builder for [`OutboundRequest`].
///
/// Invalid URLs and headers are reported by [`build`](Self::build).
pub struct OutboundRequestBuilder {
    method: Method,
    url: Result<Url>,
    headers: HeaderMap,
    body: OutgoingBody,
    error: Option<BridgeError>,
}

impl OutboundRequestBuilder {
    fn new(method: Method, url: &str) -> Self {
        Self {
            method,
            url: Url::parse(url).map_err(BridgeError::from),
            headers: HeaderMap::new(),
            body: OutgoingBody::None,
            error: None,
        }
    }

    /// Append a header. Repeated names keep every value, in order.
    pub fn header(
        mut self,
        name: impl TryInto<HeaderName, Error: Into<BridgeError>>,
        value: impl TryInto<HeaderValue, Error: Into<BridgeError>>,
    ) -> Self {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            (Err(err), _) => self.record_error(err.into()),
            (_, Err(err)) => self.record_error(err.into()),
        }
        self
    }

    /// Append all headers from a map.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    /// Set the body.
    pub fn body(mut self, body: OutgoingBody) -> Self {
        self.body = body;
        self
    }

    /// Set a raw byte body.
    pub fn bytes(self, data: impl Into<Bytes>) -> Self {
        self.body(OutgoingBody::bytes(data))
    }

    /// Set a plain text body.
    pub fn text(self, text: impl Into<String>) -> Self {
        self.body(OutgoingBody::text(text))
    }

    /// Set a JSON body from a serializable value.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match OutgoingBody::json(value) {
            Ok(body) => self.body = body,
            Err(err) => {
                tracing::error!(
                    target: "horizon_lattice_transport::request",
                    "Failed to serialize JSON body: {}",
                    err
                );
                self.record_error(err);
            }
        }
        self
    }

    /// Set a readable stream body.
    pub fn reader(self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.body(OutgoingBody::reader(reader))
    }

    /// Declare the body's content type.
    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.body = self.body.with_content_type(content_type);
        self
    }

    /// Build the request.
    pub fn build(self) -> Result<OutboundRequest> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(OutboundRequest {
            method: self.method,
            url: self.url?,
            headers: self.headers,
            body: self.body,
        })
    }

    fn record_error(&mut self, err: BridgeError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}
