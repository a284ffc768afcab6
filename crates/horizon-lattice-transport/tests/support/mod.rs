//! A scripted transport engine for driving the bridge in tests.
//!
//! The engine reacts to the adapter the way a real engine does: a redirect
//! waits for `follow_redirect`, each `read` completes with the next scripted
//! chunk, and the terminal event is delivered once the chunks run out. Every
//! event is posted through the executor handed to the builder.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use horizon_lattice_transport::executor::Executor;
use horizon_lattice_transport::upload::{UploadDataProvider, read_to_bytes};
use horizon_lattice_transport::{
    EngineError, ErrorCode, RequestCallback, TransportEngine, UrlRequest, UrlRequestBuilder,
    UrlResponseInfo,
};
use parking_lot::Mutex;

pub const URL: &str = "https://example.com/resource";

/// How a scripted request ends once its chunks are exhausted.
#[derive(Clone, Debug)]
pub enum Ending {
    Succeed,
    Fail(EngineError),
    CancelByEngine,
    /// Never deliver a terminal event on its own.
    Hang,
}

#[derive(Clone, Debug)]
pub struct Script {
    fail_on_start: Option<EngineError>,
    redirects: Vec<(UrlResponseInfo, String)>,
    response: UrlResponseInfo,
    chunks: Vec<Vec<u8>>,
    ending: Ending,
    stray_events: bool,
}

impl Script {
    pub fn ok(status: u16) -> Self {
        Self {
            fail_on_start: None,
            redirects: Vec::new(),
            response: UrlResponseInfo::new(URL, status),
            chunks: Vec::new(),
            ending: Ending::Succeed,
            stray_events: false,
        }
    }

    pub fn failing_on_start(error: EngineError) -> Self {
        Self {
            fail_on_start: Some(error),
            ..Self::ok(200)
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.response = self.response.with_header(name, value);
        self
    }

    pub fn protocol(mut self, protocol: &str) -> Self {
        self.response = self.response.with_protocol(protocol);
        self
    }

    pub fn chunk(mut self, data: impl AsRef<[u8]>) -> Self {
        self.chunks.push(data.as_ref().to_vec());
        self
    }

    pub fn redirect(mut self, status: u16, location: &str) -> Self {
        let info = UrlResponseInfo::new(URL, status).with_header("Location", location);
        self.redirects.push((info, location.to_string()));
        self
    }

    pub fn ending(mut self, ending: Ending) -> Self {
        self.ending = ending;
        self
    }

    pub fn hanging(self) -> Self {
        self.ending(Ending::Hang)
    }

    /// Deliver late events right after the terminal one.
    pub fn stray_events(mut self) -> Self {
        self.stray_events = true;
        self
    }
}

/// What the engine was asked to do.
#[derive(Debug, Default)]
pub struct Recorded {
    pub url: Mutex<Option<String>>,
    pub method: Mutex<Option<String>>,
    pub headers: Mutex<Vec<(String, String)>>,
    pub upload: Mutex<Option<Bytes>>,
    pub read_capacities: Mutex<Vec<usize>>,
    pub builds: AtomicUsize,
    pub starts: AtomicUsize,
    pub follows: AtomicUsize,
    pub cancels: AtomicUsize,
}

impl Recorded {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn follows(&self) -> usize {
        self.follows.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.headers
            .lock()
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
            .collect()
    }
}

#[derive(Clone)]
pub struct ScriptedEngine {
    script: Script,
    recorded: Arc<Recorded>,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            recorded: Arc::new(Recorded::default()),
        }
    }

    pub fn recorded(&self) -> Arc<Recorded> {
        self.recorded.clone()
    }
}

impl TransportEngine for ScriptedEngine {
    fn new_request_builder(
        &self,
        url: &str,
        callback: Arc<dyn RequestCallback>,
        executor: Arc<dyn Executor>,
    ) -> Box<dyn UrlRequestBuilder> {
        *self.recorded.url.lock() = Some(url.to_string());
        Box::new(ScriptedBuilder {
            script: self.script.clone(),
            recorded: self.recorded.clone(),
            callback,
            executor,
        })
    }
}

struct ScriptedBuilder {
    script: Script,
    recorded: Arc<Recorded>,
    callback: Arc<dyn RequestCallback>,
    executor: Arc<dyn Executor>,
}

impl UrlRequestBuilder for ScriptedBuilder {
    fn set_http_method(&mut self, method: &str) {
        *self.recorded.method.lock() = Some(method.to_string());
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.recorded
            .headers
            .lock()
            .push((name.to_string(), value.to_string()));
    }

    fn set_upload_data_provider(
        &mut self,
        mut provider: Box<dyn UploadDataProvider>,
        _executor: Arc<dyn Executor>,
    ) {
        *self.recorded.upload.lock() = read_to_bytes(provider.as_mut()).ok();
    }

    fn build(self: Box<Self>) -> Arc<dyn UrlRequest> {
        self.recorded.builds.fetch_add(1, Ordering::SeqCst);
        Arc::new(ScriptedRequest {
            inner: Arc::new(RequestInner {
                redirects: Mutex::new(self.script.redirects.into_iter().collect()),
                chunks: Mutex::new(self.script.chunks.into_iter().collect()),
                fail_on_start: self.script.fail_on_start,
                response: self.script.response,
                ending: self.script.ending,
                stray_events: self.script.stray_events,
                responded: AtomicBool::new(false),
                done: AtomicBool::new(false),
                recorded: self.recorded,
                callback: self.callback,
                executor: self.executor,
            }),
        })
    }
}

struct RequestInner {
    redirects: Mutex<VecDeque<(UrlResponseInfo, String)>>,
    chunks: Mutex<VecDeque<Vec<u8>>>,
    fail_on_start: Option<EngineError>,
    response: UrlResponseInfo,
    ending: Ending,
    stray_events: bool,
    responded: AtomicBool,
    done: AtomicBool,
    recorded: Arc<Recorded>,
    callback: Arc<dyn RequestCallback>,
    executor: Arc<dyn Executor>,
}

#[derive(Clone)]
struct ScriptedRequest {
    inner: Arc<RequestInner>,
}

impl ScriptedRequest {
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

    fn next_stage(&self) {
        let redirect = self.inner.redirects.lock().pop_front();
        if let Some((info, location)) = redirect {
            self.post(move |callback, request| {
                callback.on_redirect_received(request, &info, &location)
            });
            return;
        }

        self.inner.responded.store(true, Ordering::SeqCst);
        let info = self.inner.response.clone();
        self.post(move |callback, request| callback.on_response_started(request, &info));
    }

    fn finish(&self) {
        if matches!(self.inner.ending, Ending::Hang) {
            return;
        }
        if self.inner.done.swap(true, Ordering::SeqCst) {
            return;
        }

        let info = self.inner.response.clone();
        let stray = self.inner.stray_events;
        match self.inner.ending.clone() {
            Ending::Succeed => self.post(move |callback, request| {
                callback.on_succeeded(request, &info);
                if stray {
                    callback.on_read_completed(request, &info, BytesMut::from(&b"stray"[..]));
                    callback.on_failed(
                        request,
                        Some(&info),
                        EngineError::new(ErrorCode::Other, "stray failure"),
                    );
                    callback.on_canceled(request, Some(&info));
                }
            }),
            Ending::Fail(error) => {
                self.post(move |callback, request| callback.on_failed(request, Some(&info), error))
            }
            Ending::CancelByEngine => {
                self.post(move |callback, request| callback.on_canceled(request, Some(&info)))
            }
            Ending::Hang => {}
        }
    }
}

impl UrlRequest for ScriptedRequest {
    fn start(&self) {
        self.inner.recorded.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.inner.fail_on_start.clone() {
            self.inner.done.store(true, Ordering::SeqCst);
            self.post(move |callback, request| callback.on_failed(request, None, error));
            return;
        }
        self.next_stage();
    }

    fn follow_redirect(&self) {
        self.inner.recorded.follows.fetch_add(1, Ordering::SeqCst);
        self.next_stage();
    }

    fn read(&self, mut buffer: BytesMut) {
        self.inner
            .recorded
            .read_capacities
            .lock()
            .push(buffer.capacity());

        let chunk = self.inner.chunks.lock().pop_front();
        let Some(mut chunk) = chunk else {
            self.finish();
            return;
        };

        let spare = buffer.capacity() - buffer.len();
        if chunk.len() > spare {
            let rest = chunk.split_off(spare);
            self.inner.chunks.lock().push_front(rest);
        }
        buffer.extend_from_slice(&chunk);

        let info = self.inner.response.clone();
        self.post(move |callback, request| callback.on_read_completed(request, &info, buffer));
    }

    fn cancel(&self) {
        self.inner.recorded.cancels.fetch_add(1, Ordering::SeqCst);
        if self.inner.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let info = self
            .inner
            .responded
            .load(Ordering::SeqCst)
            .then(|| self.inner.response.clone());
        self.post(move |callback, request| callback.on_canceled(request, info.as_ref()));
    }

    fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }
}

/// Poll `condition` until it holds or a second passes.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
