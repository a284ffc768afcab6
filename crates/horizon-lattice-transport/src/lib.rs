//! Transport bridge for Horizon Lattice.
//!
//! This crate turns a callback-driven network engine into awaitable HTTP
//! calls:
//!
//! - **Request bridge**: dispatches an [`OutboundRequest`] and resolves to
//!   exactly one [`InboundResponse`] or [`BridgeError`]
//! - **Engine contract**: the callback traits a network engine implements
//! - **Reference engine**: [`ReqwestEngine`], an engine backed by reqwest
//!
//! # Executing Requests
//!
//! ```ignore
//! use horizon_lattice_transport::{OutboundRequest, RequestBridge, ReqwestEngine};
//!
//! let bridge = RequestBridge::new(ReqwestEngine::new()?)?;
//!
//! let request = OutboundRequest::get("https://api.example.com/data")
//!     .header("Accept", "application/json")
//!     .build()?;
//! let response = bridge.execute(request).await?;
//!
//! let data: MyData = response.json()?;
//! ```
//!
//! ## Request Bodies
//!
//! Bodies are handed to the engine as length-bounded uploads. Readers and
//! writers are drained into memory before the request starts:
//!
//! ```ignore
//! use horizon_lattice_transport::{OutboundRequest, OutgoingBody};
//! use tokio::io::AsyncWriteExt;
//!
//! let request = OutboundRequest::post("https://api.example.com/upload")
//!     .body(OutgoingBody::writer(|mut sink| async move {
//!         sink.write_all(b"generated").await?;
//!         sink.shutdown().await
//!     }))
//!     .build()?;
//! ```
//!
//! ## Redirects
//!
//! Redirects are not followed by default: the redirect response itself is
//! returned, with an empty body. Enable following per bridge:
//!
//! ```ignore
//! let bridge = RequestBridge::builder(engine)
//!     .follow_redirects(true)
//!     .build()?;
//! ```
//!
//! ## Cancellation
//!
//! [`RequestBridge::dispatch`] returns a [`Call`] that can be cancelled.
//! Dropping an unresolved call, or the future of
//! [`RequestBridge::execute`], cancels it as well:
//!
//! ```ignore
//! let call = bridge.dispatch(request).await?;
//! call.cancel();
//! assert!(call.await.unwrap_err().is_cancelled());
//! ```
//!
//! # Configuration
//!
//! [`EngineConfig`] can be built in code or loaded from TOML:
//!
//! ```ignore
//! let config = EngineConfig::from_toml_str(r#"
//!     follow_redirects = true
//!     response_buffer_size = 65536
//!     threads_count = 8
//! "#)?;
//! let bridge = RequestBridge::builder(engine).config(config).build()?;
//! ```

mod body;
mod bridge;
mod callback;
mod config;
pub mod engine;
mod error;
pub mod executor;
mod request;
mod reqwest_engine;
mod response;
pub mod runtime;
pub mod upload;

pub use error::{BridgeError, Result};

pub use body::{BodyReader, BodyWriter, ContentType, OutgoingBody};
pub use bridge::{Call, HttpEngine, RequestBridge, RequestBridgeBuilder};
pub use callback::{CallState, RequestId};
pub use config::{DEFAULT_RESPONSE_BUFFER_SIZE, DEFAULT_THREADS_COUNT, EngineConfig};
pub use engine::{
    EngineError, ErrorCode, RequestCallback, TransportEngine, UrlRequest, UrlRequestBuilder,
    UrlResponseInfo,
};
pub use executor::{Executor, ThreadPoolExecutor};
pub use request::{OutboundRequest, OutboundRequestBuilder};
pub use reqwest_engine::{DEFAULT_MAX_REDIRECTS, ReqwestEngine, ReqwestEngineBuilder};
pub use response::{InboundResponse, ProtocolVersion, ResponseBody};
pub use upload::{BytesUploadProvider, UploadDataProvider, UploadDataProviders};
