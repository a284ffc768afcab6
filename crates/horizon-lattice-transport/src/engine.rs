//! The callback contract of a transport engine.
//!
//! A transport engine performs the actual network work (connections, TLS,
//! QUIC, caching) and reports the lifecycle of each request through a
//! [`RequestCallback`]. Every callback runs on the [`Executor`] handed to
//! [`TransportEngine::new_request_builder`].
//!
//! The event order for one request is:
//!
//! ```text
//! on_redirect_received*  on_response_started  on_read_completed*  terminal
//! ```
//!
//! where the terminal event is exactly one of `on_succeeded`, `on_failed` or
//! `on_canceled`. `on_read_completed` is only delivered in response to a
//! [`UrlRequest::read`], and `on_succeeded` is delivered instead of a read
//! completion once the body is exhausted.

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;

use crate::executor::Executor;
use crate::upload::UploadDataProvider;

/// Creates native requests.
pub trait TransportEngine: Send + Sync {
    /// Start building a request for `url` whose events are delivered to
    /// `callback` on `executor`.
    fn new_request_builder(
        &self,
        url: &str,
        callback: Arc<dyn RequestCallback>,
        executor: Arc<dyn Executor>,
    ) -> Box<dyn UrlRequestBuilder>;
}

impl<E: TransportEngine + ?Sized> TransportEngine for Arc<E> {
    fn new_request_builder(
        &self,
        url: &str,
        callback: Arc<dyn RequestCallback>,
        executor: Arc<dyn Executor>,
    ) -> Box<dyn UrlRequestBuilder> {
        (**self).new_request_builder(url, callback, executor)
    }
}

/// Builder for a native request.
pub trait UrlRequestBuilder: Send {
    /// Set the HTTP method. Engines default to `GET`.
    fn set_http_method(&mut self, method: &str);

    /// Append a header. Repeated names are sent as repeated headers.
    fn add_header(&mut self, name: &str, value: &str);

    /// Attach the request body. `executor` runs the provider's reads.
    fn set_upload_data_provider(
        &mut self,
        provider: Box<dyn UploadDataProvider>,
        executor: Arc<dyn Executor>,
    );

    /// Finish building. The returned request has not been started.
    fn build(self: Box<Self>) -> Arc<dyn UrlRequest>;
}

/// A native request handle.
///
/// All methods may be called from any thread. Calling `cancel` on a request
/// that already reached a terminal state is a no-op.
pub trait UrlRequest: Send + Sync {
    /// Start the request.
    fn start(&self);

    /// Follow a pending redirect reported by `on_redirect_received`.
    fn follow_redirect(&self);

    /// Read response bytes into the spare capacity of `buffer`.
    ///
    /// The engine appends at most `buffer.capacity() - buffer.len()` bytes and
    /// hands the buffer back through `on_read_completed`.
    fn read(&self, buffer: BytesMut);

    /// Request cancellation. The engine acknowledges with `on_canceled`
    /// unless a terminal event was already delivered.
    fn cancel(&self);

    /// Whether a terminal event has been (or is being) delivered.
    fn is_done(&self) -> bool;
}

/// Receives the lifecycle events of one native request.
pub trait RequestCallback: Send + Sync {
    /// A redirect was received. The request waits until `follow_redirect` or
    /// `cancel` is called.
    fn on_redirect_received(
        &self,
        request: &dyn UrlRequest,
        info: &UrlResponseInfo,
        new_location_url: &str,
    );

    /// Final response headers are available.
    fn on_response_started(&self, request: &dyn UrlRequest, info: &UrlResponseInfo);

    /// A read issued with [`UrlRequest::read`] completed.
    fn on_read_completed(&self, request: &dyn UrlRequest, info: &UrlResponseInfo, buffer: BytesMut);

    /// The request completed and the whole body was read.
    fn on_succeeded(&self, request: &dyn UrlRequest, info: &UrlResponseInfo);

    /// The request failed. `info` is absent if no response was received.
    fn on_failed(&self, request: &dyn UrlRequest, info: Option<&UrlResponseInfo>, error: EngineError);

    /// The request was cancelled. `info` is absent if no response was received.
    fn on_canceled(&self, request: &dyn UrlRequest, info: Option<&UrlResponseInfo>);
}

/// Response metadata reported with every callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlResponseInfo {
    /// The URL this response was received from.
    pub url: String,
    /// URLs visited so far, including `url`.
    pub url_chain: Vec<String>,
    /// The HTTP status code.
    pub http_status_code: u16,
    /// The HTTP status text, such as `"OK"`.
    pub http_status_text: String,
    /// Headers in the order they were received.
    pub all_headers: Vec<(String, String)>,
    /// The ALPN/NPN protocol label, such as `"h2"`. Empty if unknown.
    pub negotiated_protocol: String,
    /// Whether the response came from the engine's cache.
    pub was_cached: bool,
    /// Total bytes received over the network so far.
    pub received_byte_count: u64,
}

impl UrlResponseInfo {
    /// Create response info with a status and no headers.
    pub fn new(url: impl Into<String>, http_status_code: u16) -> Self {
        let url = url.into();
        Self {
            url_chain: vec![url.clone()],
            url,
            http_status_code,
            http_status_text: String::new(),
            all_headers: Vec::new(),
            negotiated_protocol: String::new(),
            was_cached: false,
            received_byte_count: 0,
        }
    }

    /// Append a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.all_headers.push((name.into(), value.into()));
        self
    }

    /// Set the negotiated protocol label.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.negotiated_protocol = protocol.into();
        self
    }

    /// Get all values of a header, case-insensitively, in received order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.all_headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Classification of engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The host name could not be resolved.
    HostnameNotResolved,
    /// The device is not connected to the internet.
    InternetDisconnected,
    /// The network changed while the request was in flight.
    NetworkChanged,
    /// The request timed out.
    TimedOut,
    /// The connection was closed unexpectedly.
    ConnectionClosed,
    /// The connection attempt timed out.
    ConnectionTimedOut,
    /// The connection attempt was refused.
    ConnectionRefused,
    /// The connection was reset.
    ConnectionReset,
    /// The remote address is unreachable.
    AddressUnreachable,
    /// A QUIC protocol error occurred.
    QuicProtocolFailed,
    /// Any other failure (TLS, protocol, too many redirects, ...).
    Other,
}

impl ErrorCode {
    /// Whether retrying the request right away is likely to succeed.
    pub fn immediately_retryable(self) -> bool {
        matches!(
            self,
            Self::NetworkChanged | Self::ConnectionClosed | Self::ConnectionReset
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HostnameNotResolved => "hostname not resolved",
            Self::InternetDisconnected => "internet disconnected",
            Self::NetworkChanged => "network changed",
            Self::TimedOut => "timed out",
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionTimedOut => "connection timed out",
            Self::ConnectionRefused => "connection refused",
            Self::ConnectionReset => "connection reset",
            Self::AddressUnreachable => "address unreachable",
            Self::QuicProtocolFailed => "QUIC protocol failed",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// A terminal failure reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    code: ErrorCode,
    message: String,
    internal_error_code: i32,
}

impl EngineError {
    /// Create an engine error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            internal_error_code: 0,
        }
    }

    /// Attach the engine's internal numeric error code.
    pub fn with_internal_code(mut self, internal_error_code: i32) -> Self {
        self.internal_error_code = internal_error_code;
        self
    }

    /// The error classification.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The engine's error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The engine's internal numeric error code, `0` if not reported.
    pub fn internal_error_code(&self) -> i32 {
        self.internal_error_code
    }

    /// Whether retrying the request right away is likely to succeed.
    pub fn immediately_retryable(&self) -> bool {
        self.code.immediately_retryable()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EngineError {}
