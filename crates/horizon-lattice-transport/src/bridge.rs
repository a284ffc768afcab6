//! The request bridge: executes outbound requests through a transport engine.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use tokio::sync::oneshot;

use crate::body::ContentType;
use crate::callback::{BridgeCallback, CallState, PendingCall, RequestId};
use crate::config::EngineConfig;
use crate::engine::{EngineError, ErrorCode, TransportEngine};
use crate::error::{BridgeError, Result};
use crate::executor::{Executor, ThreadPoolExecutor};
use crate::request::OutboundRequest;
use crate::response::InboundResponse;
use crate::runtime;

/// A generic HTTP execution seam.
///
/// Code written against `HttpEngine` does not care whether requests go
/// through a transport engine or anything else that produces responses.
pub trait HttpEngine: Send + Sync {
    /// Execute a request to completion.
    fn execute(
        &self,
        request: OutboundRequest,
    ) -> impl Future<Output = Result<InboundResponse>> + Send;
}

/// Builder for a [`RequestBridge`].
pub struct RequestBridgeBuilder {
    engine: Arc<dyn TransportEngine>,
    config: EngineConfig,
    executor: Option<Arc<dyn Executor>>,
}

impl RequestBridgeBuilder {
    fn new(engine: Arc<dyn TransportEngine>) -> Self {
        Self {
            engine,
            config: EngineConfig::default(),
            executor: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enabled: bool) -> Self {
        self.config.follow_redirects = enabled;
        self
    }

    /// Set the response read buffer size.
    pub fn response_buffer_size(mut self, size: usize) -> Self {
        self.config.response_buffer_size = size;
        self
    }

    /// Set the number of callback executor threads. Ignored when a custom
    /// executor is supplied.
    pub fn threads_count(mut self, count: usize) -> Self {
        self.config.threads_count = count;
        self
    }

    /// Limit the request body size.
    pub fn max_upload_size(mut self, limit: usize) -> Self {
        self.config.max_upload_size = Some(limit);
        self
    }

    /// Limit the response body size.
    pub fn max_response_size(mut self, limit: usize) -> Self {
        self.config.max_response_size = Some(limit);
        self
    }

    /// Run engine callbacks on a custom executor instead of a new pool.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build the bridge.
    pub fn build(self) -> Result<RequestBridge> {
        self.config.validate()?;

        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(ThreadPoolExecutor::new(self.config.threads_count)?),
        };

        tracing::debug!(
            target: "horizon_lattice_transport::bridge",
            follow_redirects = self.config.follow_redirects,
            response_buffer_size = self.config.response_buffer_size,
            threads_count = self.config.threads_count,
            "created request bridge"
        );

        Ok(RequestBridge {
            inner: Arc::new(BridgeInner {
                engine: self.engine,
                config: Arc::new(self.config),
                executor,
            }),
        })
    }
}

struct BridgeInner {
    engine: Arc<dyn TransportEngine>,
    config: Arc<EngineConfig>,
    executor: Arc<dyn Executor>,
}

/// Executes outbound requests through a callback-driven transport engine.
///
/// The bridge is cheaply cloneable. Clones share the engine, configuration
/// and callback executor.
///
/// # Example
///
/// ```ignore
/// use horizon_lattice_transport::{OutboundRequest, RequestBridge, ReqwestEngine};
///
/// let bridge = RequestBridge::builder(ReqwestEngine::new()?)
///     .follow_redirects(true)
///     .build()?;
///
/// let request = OutboundRequest::get("https://example.com").build()?;
/// let response = bridge.execute(request).await?;
/// println!("{} via {}", response.status(), response.version());
/// ```
#[derive(Clone)]
pub struct RequestBridge {
    inner: Arc<BridgeInner>,
}

impl RequestBridge {
    /// Create a bridge with the default configuration.
    pub fn new(engine: impl TransportEngine + 'static) -> Result<Self> {
        Self::builder(engine).build()
    }

    /// Create a builder for a bridge over `engine`.
    pub fn builder(engine: impl TransportEngine + 'static) -> RequestBridgeBuilder {
        RequestBridgeBuilder::new(Arc::new(engine))
    }

    /// The bridge's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Execute a request and wait for its response.
    ///
    /// Dropping the returned future cancels the call.
    pub async fn execute(&self, request: OutboundRequest) -> Result<InboundResponse> {
        self.dispatch(request).await?.await
    }

    /// Execute a request from synchronous code.
    ///
    /// Runs the call on the shared runtime and blocks the current thread.
    /// Fails with [`BridgeError::Runtime`] when called from an async context.
    pub fn execute_blocking(&self, request: OutboundRequest) -> Result<InboundResponse> {
        runtime::block_on(self.execute(request))?
    }

    /// Start a request and return a handle to it.
    ///
    /// The body is prepared first: streamed bodies are drained into memory,
    /// which is why this is async. The native request is started exactly
    /// once before this returns.
    pub async fn dispatch(&self, request: OutboundRequest) -> Result<Call> {
        let (method, url, headers, body) = request.into_parts();
        body.ensure_supported()?;

        let content_type = body.content_type().map(ContentType::essence);
        let upload = body
            .into_upload_provider(self.inner.config.max_upload_size)
            .await?;

        let mut header_pairs = Vec::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            let value = std::str::from_utf8(value.as_bytes()).map_err(|_| {
                BridgeError::InvalidHeader(format!("header {name} is not valid UTF-8"))
            })?;
            header_pairs.push((name.as_str(), value));
        }

        let id = RequestId::new();
        let request_time = SystemTime::now();
        let (call, receiver) = PendingCall::new(id);
        let callback = Arc::new(BridgeCallback::new(
            call.clone(),
            self.inner.config.clone(),
            request_time,
        ));

        let mut builder = self.inner.engine.new_request_builder(
            url.as_str(),
            callback,
            self.inner.executor.clone(),
        );
        builder.set_http_method(method.as_str());
        for (name, value) in header_pairs {
            builder.add_header(name, value);
        }
        if let Some(provider) = upload {
            builder.set_upload_data_provider(Box::new(provider), self.inner.executor.clone());
        }
        if let Some(content_type) = content_type {
            builder.add_header(http::header::CONTENT_TYPE.as_str(), &content_type);
        }

        let native = builder.build();
        call.attach(native.clone());

        tracing::debug!(
            target: "horizon_lattice_transport::bridge",
            id = %id,
            method = %method,
            url = %url,
            "dispatching request"
        );
        native.start();

        Ok(Call { call, receiver })
    }
}

impl HttpEngine for RequestBridge {
    fn execute(
        &self,
        request: OutboundRequest,
    ) -> impl Future<Output = Result<InboundResponse>> + Send {
        RequestBridge::execute(self, request)
    }
}

impl std::fmt::Debug for RequestBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBridge")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// A dispatched request.
///
/// Await it for the result. Dropping an unresolved `Call` cancels it.
pub struct Call {
    call: Arc<PendingCall>,
    receiver: oneshot::Receiver<Result<InboundResponse>>,
}

impl Call {
    /// The call's identifier.
    pub fn id(&self) -> RequestId {
        self.call.id()
    }

    /// Cancel the call.
    ///
    /// Returns `false` if the call had already resolved, in which case
    /// nothing happens. Otherwise the call resolves with
    /// [`BridgeError::Cancelled`] and the engine is asked to cancel.
    pub fn cancel(&self) -> bool {
        self.call.cancel()
    }

    /// Whether the call has resolved.
    pub fn is_finished(&self) -> bool {
        self.call.is_resolved()
    }

    /// Where the call is in its lifecycle.
    pub fn state(&self) -> CallState {
        self.call.state()
    }
}

impl Future for Call {
    type Output = Result<InboundResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(BridgeError::Transport(EngineError::new(
                    ErrorCode::Other,
                    "engine released the request without a terminal event",
                )))
            })
        })
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        if self.call.cancel() {
            tracing::debug!(
                target: "horizon_lattice_transport::bridge",
                id = %self.call.id(),
                "unresolved call dropped"
            );
        }
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.call.id())
            .field("state", &self.state())
            .finish()
    }
}
