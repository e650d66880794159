//! Request payloads for the blocking and non-blocking execution models.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use std::fmt;
use std::io::{self, Cursor, Read};
use std::pin::Pin;
use std::sync::Arc;

/// Produces fresh readers over the same payload.
///
/// Every attempt and every checksum pass reads the payload from the start,
/// so implementations must be able to hand out more than one stream.
pub trait ContentStreamProvider: Send + Sync {
    /// Open a new reader positioned at the start of the payload.
    fn new_stream(&self) -> io::Result<Box<dyn Read + Send>>;
}

/// In-memory payload provider.
#[derive(Debug, Clone)]
pub struct BytesContentProvider {
    data: Bytes,
}

impl BytesContentProvider {
    /// Wrap a buffer.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl ContentStreamProvider for BytesContentProvider {
    fn new_stream(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }
}

/// Payload readable by blocking code.
#[derive(Clone)]
pub struct RequestBody {
    provider: Arc<dyn ContentStreamProvider>,
    content_length: Option<u64>,
}

impl RequestBody {
    /// Body backed by an in-memory buffer.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let content_length = Some(data.len() as u64);
        Self {
            provider: Arc::new(BytesContentProvider::new(data)),
            content_length,
        }
    }

    /// Body backed by an arbitrary stream provider.
    pub fn from_provider(
        provider: Arc<dyn ContentStreamProvider>,
        content_length: Option<u64>,
    ) -> Self {
        Self {
            provider,
            content_length,
        }
    }

    /// Length of the payload, when known up front.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The underlying provider.
    pub fn provider(&self) -> &Arc<dyn ContentStreamProvider> {
        &self.provider
    }

    /// Open a new reader over the payload.
    pub fn new_stream(&self) -> io::Result<Box<dyn Read + Send>> {
        self.provider.new_stream()
    }

    /// Read the whole payload into memory.
    pub fn read_all(&self) -> io::Result<Bytes> {
        let mut buffer = Vec::with_capacity(self.content_length.unwrap_or(0) as usize);
        self.new_stream()?.read_to_end(&mut buffer)?;
        Ok(Bytes::from(buffer))
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// A single pass over a non-blocking payload.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

type StreamFactory = dyn Fn() -> BodyStream + Send + Sync;

/// Payload published to non-blocking transports as a stream of buffers.
///
/// Each call to [`AsyncRequestBody::subscribe`] replays the payload from the
/// start, which lets the retry stage resend it.
#[derive(Clone)]
pub struct AsyncRequestBody {
    content_length: Option<u64>,
    factory: Arc<StreamFactory>,
}

impl AsyncRequestBody {
    /// Body backed by an in-memory buffer.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let content_length = Some(data.len() as u64);
        Self::from_stream_fn(content_length, move || {
            Box::pin(stream::once(futures::future::ready(Ok(data.clone()))))
        })
    }

    /// Body backed by a stream factory.
    pub fn from_stream_fn<F>(content_length: Option<u64>, factory: F) -> Self
    where
        F: Fn() -> BodyStream + Send + Sync + 'static,
    {
        Self {
            content_length,
            factory: Arc::new(factory),
        }
    }

    /// Length of the payload, when known up front.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Start a new pass over the payload.
    pub fn subscribe(&self) -> BodyStream {
        (self.factory)()
    }

    /// Derive a body whose stream is a transformation of this one.
    pub fn map_stream<F>(&self, content_length: Option<u64>, transform: F) -> Self
    where
        F: Fn(BodyStream) -> BodyStream + Send + Sync + 'static,
    {
        let source = self.clone();
        Self::from_stream_fn(content_length, move || transform(source.subscribe()))
    }

    /// Drain one pass of the payload into memory.
    pub async fn collect(&self) -> io::Result<Bytes> {
        let mut stream = self.subscribe();
        let mut buffer = BytesMut::with_capacity(self.content_length.unwrap_or(0) as usize);
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

impl fmt::Debug for AsyncRequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRequestBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}
