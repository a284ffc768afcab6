//! The callback adapter: turns engine lifecycle events into one result.
//!
//! Each dispatched request owns one [`PendingCall`] (the single-resolution
//! result slot) and one [`BridgeCallback`] (the state machine that receives
//! the engine's events). The callback is the only writer of the response
//! accumulator. Resolution is guarded by a compare-and-set on the
//! `resolved` flag, so a late engine event and a caller cancellation can
//! never both resolve the call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::EngineConfig;
use crate::engine::{EngineError, RequestCallback, UrlRequest, UrlResponseInfo};
use crate::error::{BridgeError, Result};
use crate::response::InboundResponse;

/// Unique identifier for a dispatched call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value of the ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a call is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Dispatched; no response yet.
    Started,
    /// A redirect was received and a follow/cancel decision was made.
    AwaitingRedirectDecision,
    /// Response headers arrived; body reads are in progress.
    ReadingBody,
    /// Completed with a response.
    Succeeded,
    /// Completed with a transport failure.
    Failed,
    /// Completed by cancellation.
    Canceled,
}

impl CallState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

type Outcome = Result<InboundResponse>;

/// In-flight state shared between a [`Call`](crate::Call) and its callback.
pub(crate) struct PendingCall {
    id: RequestId,
    resolved: AtomicBool,
    state: Mutex<CallState>,
    slot: Mutex<Option<oneshot::Sender<Outcome>>>,
    request: Mutex<Option<Arc<dyn UrlRequest>>>,
}

impl PendingCall {
    pub(crate) fn new(id: RequestId) -> (Arc<Self>, oneshot::Receiver<Outcome>) {
        let (sender, receiver) = oneshot::channel();
        let call = Arc::new(Self {
            id,
            resolved: AtomicBool::new(false),
            state: Mutex::new(CallState::Started),
            slot: Mutex::new(Some(sender)),
            request: Mutex::new(None),
        });
        (call, receiver)
    }

    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    /// Remember the native request so cancellation can be forwarded. The
    /// handle is released once the call resolves.
    pub(crate) fn attach(&self, request: Arc<dyn UrlRequest>) {
        if self.is_resolved() {
            return;
        }
        let mut slot = self.request.lock();
        if slot.is_some() {
            tracing::warn!(
                target: "horizon_lattice_transport::callback",
                id = %self.id,
                "native request attached twice"
            );
        }
        *slot = Some(request);
    }

    pub(crate) fn state(&self) -> CallState {
        *self.state.lock()
    }

    /// Record a non-terminal transition. Ignored once the call resolved.
    fn set_state(&self, state: CallState) {
        let mut current = self.state.lock();
        if current.is_terminal() {
            return;
        }
        tracing::trace!(
            target: "horizon_lattice_transport::callback",
            id = %self.id,
            from = ?*current,
            to = ?state,
            "state transition"
        );
        *current = state;
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Resolve the call and enter the terminal `state`. Returns `false` if
    /// it was already resolved, in which case `outcome` is discarded.
    pub(crate) fn resolve(&self, state: CallState, outcome: Outcome) -> bool {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        {
            let mut current = self.state.lock();
            tracing::trace!(
                target: "horizon_lattice_transport::callback",
                id = %self.id,
                from = ?*current,
                to = ?state,
                "call resolved"
            );
            *current = state;
        }

        // The native request holds this call through its callback.
        self.request.lock().take();

        if let Some(sender) = self.slot.lock().take() {
            // The caller may have stopped waiting; the outcome is then dropped.
            let _ = sender.send(outcome);
        }
        true
    }

    /// Caller-side cancellation. Resolves with `Cancelled` and forwards the
    /// cancellation to the native request, unless the call already resolved.
    pub(crate) fn cancel(&self) -> bool {
        let request = self.request.lock().clone();
        if !self.resolve(CallState::Canceled, Err(BridgeError::Cancelled)) {
            return false;
        }

        tracing::debug!(
            target: "horizon_lattice_transport::callback",
            id = %self.id,
            "call cancelled by caller"
        );
        if let Some(request) = request {
            request.cancel();
        }
        true
    }
}

/// The engine callback attached to one dispatched request.
pub(crate) struct BridgeCallback {
    call: Arc<PendingCall>,
    config: Arc<EngineConfig>,
    request_time: SystemTime,
    body: Mutex<BytesMut>,
}

impl BridgeCallback {
    pub(crate) fn new(
        call: Arc<PendingCall>,
        config: Arc<EngineConfig>,
        request_time: SystemTime,
    ) -> Self {
        Self {
            call,
            config,
            request_time,
            body: Mutex::new(BytesMut::new()),
        }
    }

    fn transition(&self, state: CallState) {
        self.call.set_state(state);
    }

    fn finish(&self, state: CallState, outcome: Outcome) {
        if !self.call.resolve(state, outcome) {
            tracing::trace!(
                target: "horizon_lattice_transport::callback",
                id = %self.call.id(),
                ?state,
                "terminal event after resolution ignored"
            );
        }
    }

    fn ignore_late(&self, event: &str) -> bool {
        if self.call.is_resolved() {
            tracing::trace!(
                target: "horizon_lattice_transport::callback",
                id = %self.call.id(),
                event,
                "event after resolution ignored"
            );
            return true;
        }
        false
    }
}

impl RequestCallback for BridgeCallback {
    fn on_redirect_received(
        &self,
        request: &dyn UrlRequest,
        info: &UrlResponseInfo,
        new_location_url: &str,
    ) {
        if self.ignore_late("redirect") {
            return;
        }
        self.transition(CallState::AwaitingRedirectDecision);

        if self.config.follow_redirects {
            tracing::debug!(
                target: "horizon_lattice_transport::callback",
                id = %self.call.id(),
                status = info.http_status_code,
                location = new_location_url,
                "following redirect"
            );
            request.follow_redirect();
            return;
        }

        tracing::debug!(
            target: "horizon_lattice_transport::callback",
            id = %self.call.id(),
            status = info.http_status_code,
            location = new_location_url,
            "redirects disabled, returning redirect response"
        );
        let response = InboundResponse::from_info(info, self.request_time, Bytes::new());
        let state = terminal_state(&response);
        if self.call.resolve(state, response) {
            request.cancel();
        }
    }

    fn on_response_started(&self, request: &dyn UrlRequest, info: &UrlResponseInfo) {
        if self.ignore_late("response started") {
            return;
        }
        tracing::debug!(
            target: "horizon_lattice_transport::callback",
            id = %self.call.id(),
            status = info.http_status_code,
            protocol = %info.negotiated_protocol,
            "response started"
        );
        self.transition(CallState::ReadingBody);
        request.read(BytesMut::with_capacity(self.config.response_buffer_size));
    }

    fn on_read_completed(
        &self,
        request: &dyn UrlRequest,
        _info: &UrlResponseInfo,
        mut buffer: BytesMut,
    ) {
        if self.ignore_late("read completed") {
            return;
        }

        {
            let mut body = self.body.lock();
            if let Some(limit) = self.config.max_response_size {
                if body.len() + buffer.len() > limit {
                    drop(body);
                    tracing::warn!(
                        target: "horizon_lattice_transport::callback",
                        id = %self.call.id(),
                        limit,
                        "response body exceeds limit, cancelling"
                    );
                    let outcome = Err(BridgeError::ResponseTooLarge { limit });
                    if self.call.resolve(CallState::Failed, outcome) {
                        request.cancel();
                    }
                    return;
                }
            }
            body.extend_from_slice(&buffer);
            tracing::trace!(
                target: "horizon_lattice_transport::callback",
                id = %self.call.id(),
                chunk = buffer.len(),
                total = body.len(),
                "read completed"
            );
        }

        buffer.clear();
        request.read(buffer);
    }

    fn on_succeeded(&self, _request: &dyn UrlRequest, info: &UrlResponseInfo) {
        if self.ignore_late("succeeded") {
            return;
        }
        let body = std::mem::take(&mut *self.body.lock()).freeze();
        tracing::debug!(
            target: "horizon_lattice_transport::callback",
            id = %self.call.id(),
            status = info.http_status_code,
            body_len = body.len(),
            "request succeeded"
        );
        let response = InboundResponse::from_info(info, self.request_time, body);
        self.finish(terminal_state(&response), response);
    }

    fn on_failed(
        &self,
        _request: &dyn UrlRequest,
        _info: Option<&UrlResponseInfo>,
        error: EngineError,
    ) {
        if self.ignore_late("failed") {
            return;
        }
        tracing::debug!(
            target: "horizon_lattice_transport::callback",
            id = %self.call.id(),
            code = %error.code(),
            error = %error,
            "request failed"
        );
        self.finish(CallState::Failed, Err(BridgeError::Transport(error)));
    }

    fn on_canceled(&self, _request: &dyn UrlRequest, _info: Option<&UrlResponseInfo>) {
        if self.ignore_late("canceled") {
            return;
        }
        tracing::debug!(
            target: "horizon_lattice_transport::callback",
            id = %self.call.id(),
            "request cancelled by engine"
        );
        self.finish(CallState::Canceled, Err(BridgeError::Cancelled));
    }
}

fn terminal_state(outcome: &Outcome) -> CallState {
    match outcome {
        Ok(_) => CallState::Succeeded,
        Err(_) => CallState::Failed,
    }
}
