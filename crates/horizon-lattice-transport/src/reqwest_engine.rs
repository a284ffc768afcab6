//! A transport engine backed by reqwest.
//!
//! [`ReqwestEngine`] drives each native request from a tokio task and
//! reports its lifecycle through the engine callback contract, so the bridge
//! can be used without a platform network stack. Redirects are never
//! followed automatically: every redirect is reported and the engine waits
//! for `follow_redirect` or `cancel`.
//!
//! Response bytes are fetched lazily. Nothing is read from the connection
//! until the callback issues a read, and each read completes with whatever
//! fits in the buffer's spare capacity.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode, Version};
use parking_lot::Mutex;
use reqwest::redirect::Policy;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::engine::{
    EngineError, ErrorCode, RequestCallback, TransportEngine, UrlRequest, UrlRequestBuilder,
    UrlResponseInfo,
};
use crate::error::{BridgeError, Result};
use crate::executor::Executor;
use crate::runtime;
use crate::upload::{UploadDataProvider, read_to_bytes};

/// Default limit on redirects reported for one request.
pub const DEFAULT_MAX_REDIRECTS: usize = 20;

/// Builder for a [`ReqwestEngine`].
pub struct ReqwestEngineBuilder {
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
    max_redirects: usize,
    handle: Option<Handle>,
}

impl Default for ReqwestEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestEngineBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            timeout: None,
            connect_timeout: None,
            user_agent: Some(format!(
                "HorizonLattice/{} (Rust)",
                env!("CARGO_PKG_VERSION")
            )),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            handle: None,
        }
    }

    /// Set a timeout for each network round trip.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set how many redirects a request may report before failing.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Run request drivers on a specific runtime.
    ///
    /// Defaults to the current runtime, or the shared one outside of an
    /// async context.
    pub fn runtime_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<ReqwestEngine> {
        let mut builder = reqwest::Client::builder().redirect(Policy::none());

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = self.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        if let Some(ref user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }

        let client = builder
            .build()
            .map_err(|e| BridgeError::config(format!("failed to build HTTP client: {e}")))?;
        let handle = match self.handle {
            Some(handle) => handle,
            None => runtime::handle()?,
        };

        Ok(ReqwestEngine {
            shared: Arc::new(EngineShared {
                client,
                handle,
                max_redirects: self.max_redirects,
            }),
        })
    }
}

struct EngineShared {
    client: reqwest::Client,
    handle: Handle,
    max_redirects: usize,
}

/// A transport engine that performs requests with reqwest.
///
/// The engine is cheaply cloneable; clones share one connection pool.
#[derive(Clone)]
pub struct ReqwestEngine {
    shared: Arc<EngineShared>,
}

impl ReqwestEngine {
    /// Create an engine with default settings.
    pub fn new() -> Result<Self> {
        ReqwestEngineBuilder::new().build()
    }

    /// Create a builder for configuring an engine.
    pub fn builder() -> ReqwestEngineBuilder {
        ReqwestEngineBuilder::new()
    }
}

impl std::fmt::Debug for ReqwestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestEngine")
            .field("max_redirects", &self.shared.max_redirects)
            .finish_non_exhaustive()
    }
}

impl TransportEngine for ReqwestEngine {
    fn new_request_builder(
        &self,
        url: &str,
        callback: Arc<dyn RequestCallback>,
        executor: Arc<dyn Executor>,
    ) -> Box<dyn UrlRequestBuilder> {
        Box::new(ReqwestRequestBuilder {
            engine: self.shared.clone(),
            url: url.to_string(),
            method: Method::GET.to_string(),
            headers: Vec::new(),
            upload: None,
            callback,
            executor,
        })
    }
}

struct Upload {
    provider: Box<dyn UploadDataProvider>,
    executor: Arc<dyn Executor>,
}

struct ReqwestRequestBuilder {
    engine: Arc<EngineShared>,
    url: String,
    method: String,
    headers: Vec<(String, String)>,
    upload: Option<Upload>,
    callback: Arc<dyn RequestCallback>,
    executor: Arc<dyn Executor>,
}

impl UrlRequestBuilder for ReqwestRequestBuilder {
    fn set_http_method(&mut self, method: &str) {
        self.method = method.to_string();
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn set_upload_data_provider(
        &mut self,
        provider: Box<dyn UploadDataProvider>,
        executor: Arc<dyn Executor>,
    ) {
        self.upload = Some(Upload { provider, executor });
    }

    fn build(self: Box<Self>) -> Arc<dyn UrlRequest> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        Arc::new(ReqwestRequest {
            inner: Arc::new(RequestInner {
                engine: self.engine,
                url: self.url,
                method: self.method,
                headers: self.headers,
                upload: Mutex::new(self.upload),
                callback: self.callback,
                executor: self.executor,
                started: AtomicBool::new(false),
                done: AtomicBool::new(false),
                commands,
                command_rx: Mutex::new(Some(command_rx)),
            }),
        })
    }
}

#[derive(Debug)]
enum Command {
    FollowRedirect,
    Read(BytesMut),
    Cancel,
}

enum Outcome {
    Succeeded(UrlResponseInfo),
    Failed(Option<UrlResponseInfo>, EngineError),
    Canceled(Option<UrlResponseInfo>),
}

struct RequestInner {
    engine: Arc<EngineShared>,
    url: String,
    method: String,
    headers: Vec<(String, String)>,
    upload: Mutex<Option<Upload>>,
    callback: Arc<dyn RequestCallback>,
    executor: Arc<dyn Executor>,
    started: AtomicBool,
    done: AtomicBool,
    commands: mpsc::UnboundedSender<Command>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

#[derive(Clone)]
struct ReqwestRequest {
    inner: Arc<RequestInner>,
}

impl UrlRequest for ReqwestRequest {
    fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                target: "horizon_lattice_transport::reqwest_engine",
                url = %self.inner.url,
                "request already started"
            );
            return;
        }
        let Some(commands) = self.inner.command_rx.lock().take() else {
            return;
        };
        let request = self.clone();
        self.inner.engine.handle.spawn(request.drive(commands));
    }

    fn follow_redirect(&self) {
        self.send(Command::FollowRedirect);
    }

    fn read(&self, buffer: BytesMut) {
        self.send(Command::Read(buffer));
    }

    fn cancel(&self) {
        if self.inner.done.load(Ordering::Acquire) {
            return;
        }
        if !self.inner.started.swap(true, Ordering::AcqRel) {
            // Never started, so there is no driver to acknowledge.
            if !self.inner.done.swap(true, Ordering::AcqRel) {
                self.post(|callback, request| callback.on_canceled(request, None));
            }
            return;
        }
        self.send(Command::Cancel);
    }

    fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }
}

impl ReqwestRequest {
    fn send(&self, command: Command) {
        // The driver is gone once the request is done.
        let _ = self.inner.commands.send(command);
    }

    fn post<F>(&self, event: F)
    where
        F: FnOnce(&dyn RequestCallback, &dyn UrlRequest) + Send + 'static,
    {
        let callback = self.inner.callback.clone();
        let request = self.clone();
        self.inner
            .executor
            .execute(Box::new(move || event(callback.as_ref(), &request)));
    }

    async fn drive(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let outcome = self.run(&mut commands).await;
        self.inner.done.store(true, Ordering::Release);

        match outcome {
            Outcome::Succeeded(info) => {
                tracing::debug!(
                    target: "horizon_lattice_transport::reqwest_engine",
                    url = %info.url,
                    received = info.received_byte_count,
                    "request succeeded"
                );
                self.post(move |callback, request| callback.on_succeeded(request, &info));
            }
            Outcome::Failed(info, error) => {
                tracing::debug!(
                    target: "horizon_lattice_transport::reqwest_engine",
                    url = %self.inner.url,
                    code = %error.code(),
                    error = %error,
                    "request failed"
                );
                self.post(move |callback, request| {
                    callback.on_failed(request, info.as_ref(), error)
                });
            }
            Outcome::Canceled(info) => {
                tracing::debug!(
                    target: "horizon_lattice_transport::reqwest_engine",
                    url = %self.inner.url,
                    "request cancelled"
                );
                self.post(move |callback, request| callback.on_canceled(request, info.as_ref()));
            }
        }
    }

    async fn run(&self, commands: &mut mpsc::UnboundedReceiver<Command>) -> Outcome {
        let engine = &self.inner.engine;

        let mut url = match Url::parse(&self.inner.url) {
            Ok(url) => url,
            Err(e) => {
                return Outcome::Failed(
                    None,
                    EngineError::new(ErrorCode::Other, format!("invalid URL: {e}")),
                );
            }
        };
        let mut method = match Method::from_bytes(self.inner.method.as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                return Outcome::Failed(
                    None,
                    EngineError::new(ErrorCode::Other, format!("invalid method: {e}")),
                );
            }
        };
        let mut body = match self.read_upload(commands).await {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };

        let mut url_chain = vec![url.to_string()];
        let mut redirects = 0;
        let mut body_dropped = false;

        let (mut response, mut info) = loop {
            let mut request = engine.client.request(method.clone(), url.clone());
            for (name, value) in &self.inner.headers {
                if body_dropped && is_body_header(name) {
                    continue;
                }
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &body {
                request = request.body(body.clone());
            }

            let response = match or_cancel(commands, request.send()).await {
                None => return Outcome::Canceled(None),
                Some(Err(err)) => return Outcome::Failed(None, engine_error(&err)),
                Some(Ok(response)) => response,
            };
            let info = response_info(&response, &url_chain);

            let Some(location) = redirect_location(&response, &url) else {
                break (response, info);
            };
            if redirects == engine.max_redirects {
                return Outcome::Failed(
                    Some(info),
                    EngineError::new(ErrorCode::Other, "net::ERR_TOO_MANY_REDIRECTS"),
                );
            }

            tracing::trace!(
                target: "horizon_lattice_transport::reqwest_engine",
                status = info.http_status_code,
                location = %location,
                "redirect received"
            );
            let redirect_info = info.clone();
            let new_location = location.to_string();
            self.post(move |callback, request| {
                callback.on_redirect_received(request, &redirect_info, &new_location)
            });

            loop {
                match next_command(commands).await {
                    Command::FollowRedirect => break,
                    Command::Cancel => return Outcome::Canceled(Some(info)),
                    Command::Read(_) => tracing::warn!(
                        target: "horizon_lattice_transport::reqwest_engine",
                        "read issued while a redirect is pending"
                    ),
                }
            }

            if let Some(rewritten) = redirect_method(response.status(), &method) {
                method = rewritten;
                body = None;
                body_dropped = true;
            }
            redirects += 1;
            url = location;
            url_chain.push(url.to_string());
        };

        let started_info = info.clone();
        self.post(move |callback, request| callback.on_response_started(request, &started_info));

        let mut pending = Bytes::new();
        let mut exhausted = false;
        loop {
            let mut buffer = loop {
                match next_command(commands).await {
                    Command::Read(buffer) => break buffer,
                    Command::Cancel => return Outcome::Canceled(Some(info)),
                    Command::FollowRedirect => tracing::warn!(
                        target: "horizon_lattice_transport::reqwest_engine",
                        "follow_redirect issued without a pending redirect"
                    ),
                }
            };

            let spare = buffer.capacity() - buffer.len();
            if spare == 0 {
                return Outcome::Failed(
                    Some(info),
                    EngineError::new(ErrorCode::Other, "read buffer has no spare capacity"),
                );
            }

            while pending.is_empty() && !exhausted {
                match or_cancel(commands, response.chunk()).await {
                    None => return Outcome::Canceled(Some(info)),
                    Some(Err(err)) => return Outcome::Failed(Some(info), engine_error(&err)),
                    Some(Ok(Some(chunk))) => {
                        info.received_byte_count += chunk.len() as u64;
                        pending = chunk;
                    }
                    Some(Ok(None)) => exhausted = true,
                }
            }
            if pending.is_empty() {
                return Outcome::Succeeded(info);
            }

            let n = spare.min(pending.len());
            buffer.extend_from_slice(&pending.split_to(n));
            let read_info = info.clone();
            self.post(move |callback, request| {
                callback.on_read_completed(request, &read_info, buffer)
            });
        }
    }

    /// Pull the whole upload body on the provider's executor.
    async fn read_upload(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> std::result::Result<Option<Bytes>, Outcome> {
        let upload = self.inner.upload.lock().take();
        let Some(Upload {
            mut provider,
            executor,
        }) = upload
        else {
            return Ok(None);
        };

        let (tx, rx) = oneshot::channel();
        executor.execute(Box::new(move || {
            let _ = tx.send(read_to_bytes(provider.as_mut()));
        }));

        match or_cancel(commands, rx).await {
            None => Err(Outcome::Canceled(None)),
            Some(Ok(Ok(body))) => Ok(Some(body)),
            Some(Ok(Err(err))) => Err(Outcome::Failed(
                None,
                EngineError::new(ErrorCode::Other, format!("upload provider failed: {err}")),
            )),
            Some(Err(_)) => Err(Outcome::Failed(
                None,
                EngineError::new(ErrorCode::Other, "upload provider was dropped"),
            )),
        }
    }
}

async fn next_command(commands: &mut mpsc::UnboundedReceiver<Command>) -> Command {
    commands.recv().await.unwrap_or(Command::Cancel)
}

/// Run `future` until it completes or a cancellation arrives.
async fn or_cancel<F: Future>(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    future: F,
) -> Option<F::Output> {
    tokio::pin!(future);
    loop {
        tokio::select! {
            output = &mut future => return Some(output),
            command = next_command(commands) => match command {
                Command::Cancel => return None,
                other => tracing::warn!(
                    target: "horizon_lattice_transport::reqwest_engine",
                    command = ?other,
                    "unexpected command while waiting on the network"
                ),
            },
        }
    }
}

fn redirect_location(response: &reqwest::Response, base: &Url) -> Option<Url> {
    if !matches!(
        response.status(),
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return None;
    }
    let location = response.headers().get(http::header::LOCATION)?.to_str().ok()?;
    base.join(location).ok()
}

/// The method to switch to when following a redirect, if it changes.
fn redirect_method(status: StatusCode, method: &Method) -> Option<Method> {
    let rewrite = match status {
        StatusCode::SEE_OTHER => *method != Method::GET && *method != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => *method == Method::POST,
        _ => false,
    };
    rewrite.then_some(Method::GET)
}

fn is_body_header(name: &str) -> bool {
    name.eq_ignore_ascii_case(http::header::CONTENT_TYPE.as_str())
        || name.eq_ignore_ascii_case(http::header::CONTENT_LENGTH.as_str())
}

fn response_info(response: &reqwest::Response, url_chain: &[String]) -> UrlResponseInfo {
    let status = response.status();
    UrlResponseInfo {
        url: response.url().to_string(),
        url_chain: url_chain.to_vec(),
        http_status_code: status.as_u16(),
        http_status_text: status.canonical_reason().unwrap_or_default().to_string(),
        all_headers: response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        negotiated_protocol: protocol_label(response.version()).to_string(),
        was_cached: false,
        received_byte_count: 0,
    }
}

fn protocol_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_2 => "h2",
        Version::HTTP_3 => "h3",
        Version::HTTP_10 => "http/1.0",
        Version::HTTP_09 => "http/0.9",
        _ => "http/1.1",
    }
}

fn engine_error(err: &reqwest::Error) -> EngineError {
    let code = if err.is_timeout() {
        ErrorCode::TimedOut
    } else if err.is_connect() {
        connect_error_code(err)
    } else if err.is_body() || err.is_decode() {
        ErrorCode::ConnectionClosed
    } else {
        ErrorCode::Other
    };
    EngineError::new(code, error_chain(err))
}

fn connect_error_code(err: &(dyn std::error::Error + 'static)) -> ErrorCode {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return match io_error.kind() {
                io::ErrorKind::ConnectionRefused => ErrorCode::ConnectionRefused,
                io::ErrorKind::ConnectionReset => ErrorCode::ConnectionReset,
                io::ErrorKind::TimedOut => ErrorCode::ConnectionTimedOut,
                io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                    ErrorCode::AddressUnreachable
                }
                io::ErrorKind::NetworkDown => ErrorCode::InternetDisconnected,
                _ => ErrorCode::Other,
            };
        }
        if cause.to_string().contains("dns error") {
            return ErrorCode::HostnameNotResolved;
        }
        source = cause.source();
    }
    ErrorCode::Other
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
