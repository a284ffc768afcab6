//! Upload providers: how request bodies are handed to a transport engine.

use std::io;

use bytes::{Bytes, BytesMut};

/// Default chunk size used when draining a provider.
const DRAIN_CHUNK_SIZE: usize = 16 * 1024;

/// Supplies request body bytes to a transport engine.
///
/// Engines pull the body in chunks and may rewind the provider to replay it
/// (for example when following a redirect that preserves the body).
pub trait UploadDataProvider: Send {
    /// Total body length in bytes, or `None` for a chunked upload.
    fn length(&self) -> Option<u64>;

    /// Append up to `buffer.capacity() - buffer.len()` bytes to `buffer`.
    ///
    /// Returns the number of bytes appended; `0` means the body is exhausted.
    fn read(&mut self, buffer: &mut BytesMut) -> io::Result<usize>;

    /// Restart the body from the beginning.
    fn rewind(&mut self) -> io::Result<()>;
}

/// An upload provider over an in-memory byte buffer.
///
/// Reads slice into the shared buffer; the body itself is never copied
/// until an engine asks for a chunk.
#[derive(Debug, Clone)]
pub struct BytesUploadProvider {
    data: Bytes,
    position: usize,
}

impl BytesUploadProvider {
    /// Wrap `data` without copying it.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }

    /// The wrapped bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
}

impl UploadDataProvider for BytesUploadProvider {
    fn length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn read(&mut self, buffer: &mut BytesMut) -> io::Result<usize> {
        let spare = buffer.capacity() - buffer.len();
        let remaining = self.data.len() - self.position;
        let n = spare.min(remaining);
        buffer.extend_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.position = 0;
        Ok(())
    }
}

/// Factory functions for common upload providers.
pub struct UploadDataProviders;

impl UploadDataProviders {
    /// Create a provider over fixed bytes.
    pub fn from_bytes(data: impl Into<Bytes>) -> BytesUploadProvider {
        BytesUploadProvider::new(data)
    }
}

/// Drain a provider into a single buffer, starting from its current position.
///
/// Engines that need the whole body up front (rather than pulling chunks as
/// the socket drains) use this.
pub fn read_to_bytes(provider: &mut dyn UploadDataProvider) -> io::Result<Bytes> {
    let capacity = provider
        .length()
        .and_then(|len| usize::try_from(len).ok())
        .unwrap_or(DRAIN_CHUNK_SIZE);
    let mut body = BytesMut::with_capacity(capacity);

    loop {
        if body.len() == body.capacity() {
            body.reserve(DRAIN_CHUNK_SIZE);
        }
        if provider.read(&mut body)? == 0 {
            break;
        }
    }

    if let Some(expected) = provider.length() {
        if body.len() as u64 != expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "upload provider declared {expected} bytes but produced {}",
                    body.len()
                ),
            ));
        }
    }

    Ok(body.freeze())
}
