//! Outgoing request bodies and their adaptation into upload providers.
//!
//! Transport engines only accept length-bounded, replayable upload sources.
//! Streamed bodies are therefore drained into memory before dispatch:
//!
//! - [`OutgoingBody::Reader`] is read to the end.
//! - [`OutgoingBody::Writer`] is run as a concurrent task writing into an
//!   in-memory pipe that the bridge drains.
//!
//! Both trade memory for compatibility; a very large streamed body is held
//! entirely in memory while it uploads. Use `max_upload_size` to bound it.

use std::fmt;
use std::future::Future;
use std::io;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::error::{BridgeError, Result};
use crate::runtime;
use crate::upload::{BytesUploadProvider, UploadDataProviders};

/// Capacity of the in-memory pipe between a body writer and the bridge.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Chunk size used while draining streamed bodies.
const DRAIN_CHUNK_SIZE: usize = 16 * 1024;

const PROTOCOL_UPGRADE_UNSUPPORTED: &str =
    "protocol upgrade bodies cannot be sent through a transport engine";

/// A media type such as `text/plain; charset=utf-8`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    kind: String,
    subtype: String,
    parameters: Vec<(String, String)>,
}

impl ContentType {
    /// Create a content type from its type and subtype.
    pub fn new(kind: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            kind: kind.into().to_ascii_lowercase(),
            subtype: subtype.into().to_ascii_lowercase(),
            parameters: Vec::new(),
        }
    }

    /// Add a parameter such as `charset=utf-8`.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    /// `text/plain; charset=utf-8`
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "utf-8")
    }

    /// `application/json`
    pub fn application_json() -> Self {
        Self::new("application", "json")
    }

    /// `application/octet-stream`
    pub fn octet_stream() -> Self {
        Self::new("application", "octet-stream")
    }

    /// The top-level type, such as `text`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The subtype, such as `plain`.
    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    /// Look up a parameter value, case-insensitively by name.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `type/subtype` without parameters. This is what the bridge sends as
    /// the `Content-Type` header.
    pub fn essence(&self) -> String {
        format!("{}/{}", self.kind, self.subtype)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)?;
        for (name, value) in &self.parameters {
            write!(f, "; {name}={value}")?;
        }
        Ok(())
    }
}

impl FromStr for ContentType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        let (kind, subtype) = essence
            .split_once('/')
            .filter(|(kind, subtype)| !kind.is_empty() && !subtype.is_empty())
            .ok_or_else(|| BridgeError::InvalidHeader(format!("invalid content type: {s}")))?;

        let mut content_type = Self::new(kind.trim(), subtype.trim());
        for parameter in parts {
            if let Some((name, value)) = parameter.split_once('=') {
                content_type = content_type
                    .with_parameter(name.trim(), value.trim().trim_matches('"'));
            }
        }
        Ok(content_type)
    }
}

/// The sink a [`OutgoingBody::Writer`] pushes its bytes into.
pub type BodyWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A readable source for [`OutgoingBody::Reader`].
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

type WriteBody = Box<dyn FnOnce(BodyWriter) -> BoxFuture<'static, io::Result<()>> + Send>;

/// The body of an outbound request.
#[derive(Default)]
pub enum OutgoingBody {
    /// No body.
    #[default]
    None,
    /// Fixed in-memory bytes.
    Bytes {
        /// The body bytes.
        data: Bytes,
        /// Declared content type.
        content_type: Option<ContentType>,
    },
    /// A readable stream, drained before dispatch.
    Reader {
        /// The body source.
        reader: BodyReader,
        /// Declared content type.
        content_type: Option<ContentType>,
    },
    /// Content that writes itself into a sink, drained before dispatch.
    Writer {
        /// The body producer.
        write: WriteBody,
        /// Declared content type.
        content_type: Option<ContentType>,
    },
    /// A body that needs a protocol upgrade (e.g. WebSocket). Never
    /// supported by a transport engine.
    ProtocolUpgrade,
}

impl OutgoingBody {
    /// A fixed byte body.
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes {
            data: data.into(),
            content_type: None,
        }
    }

    /// A UTF-8 text body declared as `text/plain; charset=utf-8`.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Bytes {
            data: Bytes::from(text.into()),
            content_type: Some(ContentType::text_plain()),
        }
    }

    /// A JSON body declared as `application/json`.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let data = serde_json::to_vec(value)?;
        Ok(Self::Bytes {
            data: Bytes::from(data),
            content_type: Some(ContentType::application_json()),
        })
    }

    /// A readable stream body.
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Reader {
            reader: Box::new(reader),
            content_type: None,
        }
    }

    /// A body produced by writing into a sink.
    ///
    /// ```
    /// use horizon_lattice_transport::OutgoingBody;
    /// use tokio::io::AsyncWriteExt;
    ///
    /// let body = OutgoingBody::writer(|mut sink| async move {
    ///     sink.write_all(b"streamed").await?;
    ///     sink.shutdown().await
    /// });
    /// assert!(body.content_type().is_none());
    /// ```
    pub fn writer<F, Fut>(write: F) -> Self
    where
        F: FnOnce(BodyWriter) -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        Self::Writer {
            write: Box::new(move |sink| Box::pin(write(sink))),
            content_type: None,
        }
    }

    /// Declare the body's content type. Has no effect on `None` and
    /// `ProtocolUpgrade`.
    pub fn with_content_type(mut self, value: ContentType) -> Self {
        match &mut self {
            Self::Bytes { content_type, .. }
            | Self::Reader { content_type, .. }
            | Self::Writer { content_type, .. } => *content_type = Some(value),
            Self::None | Self::ProtocolUpgrade => {}
        }
        self
    }

    /// The declared content type, if any.
    pub fn content_type(&self) -> Option<&ContentType> {
        match self {
            Self::Bytes { content_type, .. }
            | Self::Reader { content_type, .. }
            | Self::Writer { content_type, .. } => content_type.as_ref(),
            Self::None | Self::ProtocolUpgrade => None,
        }
    }

    /// Whether the body carries no bytes at all.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Fail fast for bodies no upload provider can represent.
    pub(crate) fn ensure_supported(&self) -> Result<()> {
        match self {
            Self::ProtocolUpgrade => Err(BridgeError::unsupported_body(
                PROTOCOL_UPGRADE_UNSUPPORTED,
            )),
            _ => Ok(()),
        }
    }

    /// Adapt the body into an upload provider, draining streamed bodies.
    ///
    /// Returns `None` for an empty body.
    pub(crate) async fn into_upload_provider(
        self,
        limit: Option<usize>,
    ) -> Result<Option<BytesUploadProvider>> {
        let data = match self {
            Self::None => return Ok(None),
            Self::ProtocolUpgrade => {
                return Err(BridgeError::unsupported_body(PROTOCOL_UPGRADE_UNSUPPORTED));
            }
            Self::Bytes { data, .. } => {
                check_upload_limit(data.len(), limit)?;
                data
            }
            Self::Reader { reader, .. } => drain(reader, limit).await?,
            Self::Writer { write, .. } => drain_writer(write, limit).await?,
        };

        tracing::trace!(
            target: "horizon_lattice_transport::body",
            len = data.len(),
            "prepared upload body"
        );
        Ok(Some(UploadDataProviders::from_bytes(data)))
    }
}

impl fmt::Debug for OutgoingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bytes { data, content_type } => f
                .debug_struct("Bytes")
                .field("len", &data.len())
                .field("content_type", content_type)
                .finish(),
            Self::Reader { content_type, .. } => f
                .debug_struct("Reader")
                .field("content_type", content_type)
                .finish_non_exhaustive(),
            Self::Writer { content_type, .. } => f
                .debug_struct("Writer")
                .field("content_type", content_type)
                .finish_non_exhaustive(),
            Self::ProtocolUpgrade => f.write_str("ProtocolUpgrade"),
        }
    }
}

fn check_upload_limit(len: usize, limit: Option<usize>) -> Result<()> {
    match limit {
        Some(limit) if len > limit => Err(BridgeError::UploadTooLarge { limit }),
        _ => Ok(()),
    }
}

async fn drain<R>(mut reader: R, limit: Option<usize>) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut body = BytesMut::new();
    loop {
        body.reserve(DRAIN_CHUNK_SIZE);
        let n = reader
            .read_buf(&mut body)
            .await
            .map_err(|e| BridgeError::body(e.to_string()))?;
        if n == 0 {
            break;
        }
        check_upload_limit(body.len(), limit)?;
    }
    Ok(body.freeze())
}

async fn drain_writer(write: WriteBody, limit: Option<usize>) -> Result<Bytes> {
    let (sink, source) = tokio::io::duplex(PIPE_CAPACITY);
    // Spawned on the current runtime, or the shared one when polled outside of it.
    let writer = runtime::handle()?.spawn(write(Box::new(sink)));

    let drained = drain(source, limit).await;
    if drained.is_err() {
        // The pipe's read side is gone; the writer would fail on its next write.
        writer.abort();
        return drained;
    }

    match writer.await {
        Ok(Ok(())) => drained,
        Ok(Err(err)) => Err(BridgeError::body(err.to_string())),
        Err(err) => Err(BridgeError::body(format!("body writer task failed: {err}"))),
    }
}
