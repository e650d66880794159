//! aws-chunked framing with a trailing checksum.
//!
//! Wire layout, for a payload split into chunks of at most `chunk_size`
//! bytes:
//!
//! ```text
//! <hex len>\r\n<data>\r\n
//! ...
//! 0\r\n<header>:<base64 checksum>\r\n\r\n
//! ```
//!
//! Every chunk except possibly the last is exactly `chunk_size` bytes, so the
//! encoded length is a pure function of the decoded length, the chunk size and
//! the trailer.

use super::{ChecksumAlgorithm, ChecksumHasher};
use crate::error::ChecksumError;
use crate::http::{BodyStream, ContentStreamProvider};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use pin_project_lite::pin_project;
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Chunk size for blocking payloads.
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;
/// Chunk size for non-blocking payloads.
pub const DEFAULT_ASYNC_CHUNK_SIZE: usize = 16 * 1024;

/// `Content-Encoding` token for chunked payloads.
pub const AWS_CHUNKED: &str = "aws-chunked";
/// Header naming the trailer the service should expect.
pub const TRAILER_HEADER: &str = "x-amz-trailer";
/// Header carrying the payload hash, or a sentinel.
pub const CONTENT_SHA256_HEADER: &str = "x-amz-content-sha256";
/// Sentinel for an unsigned chunked payload followed by a trailer.
pub const STREAMING_UNSIGNED_PAYLOAD_TRAILER: &str = "STREAMING-UNSIGNED-PAYLOAD-TRAILER";
/// Header carrying the payload length before framing.
pub const DECODED_CONTENT_LENGTH_HEADER: &str = "x-amz-decoded-content-length";

const CRLF: &[u8] = b"\r\n";
const FINAL_CHUNK: &[u8] = b"0\r\n";

/// Encoded size of one chunk carrying `len` bytes.
pub fn chunk_length(len: u64) -> u64 {
    format!("{:x}", len).len() as u64 + CRLF.len() as u64 + len + CRLF.len() as u64
}

/// Encoded size of the chunks (including the terminating zero chunk) for a
/// payload of `decoded_len` bytes.
pub fn stream_content_length(decoded_len: u64, chunk_size: usize) -> u64 {
    let chunk_size = chunk_size.max(1) as u64;
    let full_chunks = decoded_len / chunk_size;
    let remainder = decoded_len % chunk_size;
    let mut total = full_chunks * chunk_length(chunk_size);
    if remainder > 0 {
        total += chunk_length(remainder);
    }
    total + FINAL_CHUNK.len() as u64
}

/// Encoded size of the trailer block for `algorithm` under `header_name`.
pub fn trailer_length(algorithm: ChecksumAlgorithm, header_name: &str) -> u64 {
    (header_name.len() + 1 + algorithm.base64_len() + CRLF.len() + CRLF.len()) as u64
}

/// Total encoded size declared in `Content-Length`.
pub fn encoded_content_length(
    decoded_len: u64,
    chunk_size: usize,
    algorithm: ChecksumAlgorithm,
    header_name: &str,
) -> u64 {
    stream_content_length(decoded_len, chunk_size) + trailer_length(algorithm, header_name)
}

/// Frames chunks and accumulates the trailer checksum.
#[derive(Debug, Clone)]
struct ChunkFramer {
    hasher: ChecksumHasher,
    header_name: String,
}

impl ChunkFramer {
    fn new(algorithm: ChecksumAlgorithm, header_name: &str) -> Self {
        Self {
            hasher: algorithm.hasher(),
            header_name: header_name.to_string(),
        }
    }

    fn frame(&mut self, data: &[u8], out: &mut BytesMut) {
        self.hasher.update(data);
        out.extend_from_slice(format!("{:x}", data.len()).as_bytes());
        out.extend_from_slice(CRLF);
        out.extend_from_slice(data);
        out.extend_from_slice(CRLF);
    }

    fn finish(self, out: &mut BytesMut) {
        out.extend_from_slice(FINAL_CHUNK);
        out.extend_from_slice(self.header_name.as_bytes());
        out.extend_from_slice(b":");
        out.extend_from_slice(self.hasher.finalize_base64().as_bytes());
        out.extend_from_slice(CRLF);
        out.extend_from_slice(CRLF);
    }
}

/// Blocking reader producing the chunked encoding of `inner`.
pub struct ChunkedEncodingReader<R> {
    inner: R,
    framer: Option<ChunkFramer>,
    chunk: Vec<u8>,
    pending: BytesMut,
    position: usize,
}

impl<R: Read> ChunkedEncodingReader<R> {
    /// Wrap `inner`, framing it in chunks of `chunk_size` bytes.
    pub fn new(
        inner: R,
        algorithm: ChecksumAlgorithm,
        header_name: &str,
        chunk_size: usize,
    ) -> Self {
        Self {
            inner,
            framer: Some(ChunkFramer::new(algorithm, header_name)),
            chunk: vec![0u8; chunk_size.max(1)],
            pending: BytesMut::new(),
            position: 0,
        }
    }

    /// Fill `self.chunk` as far as the source allows; short only at EOF.
    fn read_chunk(&mut self) -> io::Result<usize> {
        let mut filled = 0;
        while filled < self.chunk.len() {
            match self.inner.read(&mut self.chunk[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn refill(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.position = 0;
        if self.framer.is_none() {
            return Ok(());
        }
        let filled = self.read_chunk()?;
        if filled > 0 {
            if let Some(framer) = self.framer.as_mut() {
                framer.frame(&self.chunk[..filled], &mut self.pending);
            }
        }
        if filled < self.chunk.len() {
            if let Some(framer) = self.framer.take() {
                framer.finish(&mut self.pending);
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for ChunkedEncodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.position >= self.pending.len() {
            self.refill()?;
            if self.pending.is_empty() {
                return Ok(0);
            }
        }
        let available = &self.pending[self.position..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}

/// Stream provider that frames a fresh pass of the inner payload every time.
pub struct ChunkedContentProvider {
    inner: Arc<dyn ContentStreamProvider>,
    algorithm: ChecksumAlgorithm,
    header_name: String,
    chunk_size: usize,
}

impl ChunkedContentProvider {
    /// Frame `inner` with a trailing `algorithm` checksum under `header_name`.
    pub fn new(
        inner: Arc<dyn ContentStreamProvider>,
        algorithm: ChecksumAlgorithm,
        header_name: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            inner,
            algorithm,
            header_name: header_name.into(),
            chunk_size,
        }
    }
}

impl ContentStreamProvider for ChunkedContentProvider {
    fn new_stream(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(ChunkedEncodingReader::new(
            self.inner.new_stream()?,
            self.algorithm,
            &self.header_name,
            self.chunk_size,
        )))
    }
}

pin_project! {
    /// Non-blocking stream producing the chunked encoding of `inner`.
    ///
    /// Input buffers of any size are regrouped into `chunk_size` chunks.
    pub struct ChunkedEncodingStream<S> {
        #[pin]
        inner: S,
        framer: Option<ChunkFramer>,
        buffer: BytesMut,
        chunk_size: usize,
        exhausted: bool,
    }
}

impl<S> ChunkedEncodingStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    /// Wrap `inner`, framing it in chunks of `chunk_size` bytes.
    pub fn new(
        inner: S,
        algorithm: ChecksumAlgorithm,
        header_name: &str,
        chunk_size: usize,
    ) -> Self {
        Self {
            inner,
            framer: Some(ChunkFramer::new(algorithm, header_name)),
            buffer: BytesMut::new(),
            chunk_size: chunk_size.max(1),
            exhausted: false,
        }
    }
}

impl<S> Stream for ChunkedEncodingStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if this.buffer.len() >= *this.chunk_size {
                let chunk = this.buffer.split_to(*this.chunk_size);
                let mut out = BytesMut::with_capacity(chunk.len() + 16);
                if let Some(framer) = this.framer.as_mut() {
                    framer.frame(&chunk, &mut out);
                }
                return Poll::Ready(Some(Ok(out.freeze())));
            }

            if *this.exhausted {
                let Some(mut framer) = this.framer.take() else {
                    return Poll::Ready(None);
                };
                let mut out = BytesMut::new();
                if !this.buffer.is_empty() {
                    let rest = this.buffer.split();
                    framer.frame(&rest, &mut out);
                }
                framer.finish(&mut out);
                return Poll::Ready(Some(Ok(out.freeze())));
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(data))) => this.buffer.extend_from_slice(&data),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => *this.exhausted = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Wrap a non-blocking body pass in chunked framing.
pub fn chunked_body_stream(
    inner: BodyStream,
    algorithm: ChecksumAlgorithm,
    header_name: &str,
    chunk_size: usize,
) -> BodyStream {
    Box::pin(ChunkedEncodingStream::new(inner, algorithm, header_name, chunk_size))
}

/// A decoded aws-chunked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    /// The payload bytes.
    pub data: Bytes,
    /// Trailer headers, in wire order.
    pub trailers: Vec<(String, String)>,
}

impl DecodedPayload {
    /// Look up a trailer by name (case-insensitive).
    pub fn trailer(&self, name: &str) -> Option<&str> {
        self.trailers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check the trailer checksum against the decoded data.
    pub fn verify(
        &self,
        algorithm: ChecksumAlgorithm,
        header_name: &str,
    ) -> Result<(), ChecksumError> {
        let expected = self
            .trailer(header_name)
            .ok_or_else(|| malformed(&format!("missing trailer {}", header_name)))?;
        let actual = algorithm.digest_base64(&self.data);
        if expected == actual {
            Ok(())
        } else {
            Err(ChecksumError::Mismatch {
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

/// Decode an aws-chunked payload produced by this module.
pub fn decode(encoded: &[u8]) -> Result<DecodedPayload, ChecksumError> {
    let mut data = BytesMut::new();
    let mut rest = encoded;

    loop {
        let (size_line, after) = split_line(rest)?;
        let size_text = std::str::from_utf8(size_line)
            .map_err(|_| malformed("chunk size is not UTF-8"))?;
        let size_text = size_text.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| malformed(&format!("invalid chunk size '{}'", size_text)))?;
        rest = after;

        if size == 0 {
            break;
        }
        if rest.len() < size + CRLF.len() {
            return Err(malformed("truncated chunk"));
        }
        data.extend_from_slice(&rest[..size]);
        if &rest[size..size + CRLF.len()] != CRLF {
            return Err(malformed("chunk not terminated by CRLF"));
        }
        rest = &rest[size + CRLF.len()..];
    }

    let mut trailers = Vec::new();
    loop {
        let (line, after) = split_line(rest)?;
        rest = after;
        if line.is_empty() {
            break;
        }
        let line = std::str::from_utf8(line).map_err(|_| malformed("trailer is not UTF-8"))?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(&format!("invalid trailer '{}'", line)))?;
        trailers.push((name.trim().to_string(), value.trim().to_string()));
    }

    if !rest.is_empty() {
        return Err(malformed("unexpected bytes after trailer block"));
    }

    Ok(DecodedPayload {
        data: data.freeze(),
        trailers,
    })
}

fn split_line(input: &[u8]) -> Result<(&[u8], &[u8]), ChecksumError> {
    input
        .windows(CRLF.len())
        .position(|w| w == CRLF)
        .map(|i| (&input[..i], &input[i + CRLF.len()..]))
        .ok_or_else(|| malformed("missing CRLF"))
}

fn malformed(message: &str) -> ChecksumError {
    ChecksumError::MalformedChunkedEncoding {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};
    use proptest::prelude::*;
    use std::io::Cursor;

    fn encode_blocking(
        data: &[u8],
        algorithm: ChecksumAlgorithm,
        header: &str,
        chunk: usize,
    ) -> Vec<u8> {
        let mut reader =
            ChunkedEncodingReader::new(Cursor::new(data.to_vec()), algorithm, header, chunk);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_sha1_trailer_for_eight_bytes() {
        let header = "x-amz-checksum-sha1";
        assert_eq!(stream_content_length(8, DEFAULT_CHUNK_SIZE), 16);
        assert_eq!(trailer_length(ChecksumAlgorithm::Sha1, header), 52);
        assert_eq!(
            encoded_content_length(8, DEFAULT_CHUNK_SIZE, ChecksumAlgorithm::Sha1, header),
            68
        );

        let encoded =
            encode_blocking(b"abcdefgh", ChecksumAlgorithm::Sha1, header, DEFAULT_CHUNK_SIZE);
        assert_eq!(encoded.len(), 68);
        let text = String::from_utf8(encoded).unwrap();
        assert!(text.starts_with("8\r\nabcdefgh\r\n0\r\nx-amz-checksum-sha1:"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_empty_payload() {
        let header = "x-amz-checksum-crc32";
        let encoded = encode_blocking(b"", ChecksumAlgorithm::Crc32, header, 4);
        assert_eq!(
            encoded.len() as u64,
            encoded_content_length(0, 4, ChecksumAlgorithm::Crc32, header)
        );
        let decoded = decode(&encoded).unwrap();
        assert!(decoded.data.is_empty());
        decoded.verify(ChecksumAlgorithm::Crc32, header).unwrap();
    }

    #[test]
    fn test_exact_multiple_of_chunk_size() {
        let header = "x-amz-checksum-crc32c";
        let encoded = encode_blocking(b"abcdefgh", ChecksumAlgorithm::Crc32c, header, 4);
        let text = String::from_utf8(encoded.clone()).unwrap();
        assert!(text.starts_with("4\r\nabcd\r\n4\r\nefgh\r\n0\r\n"));
        assert_eq!(
            encoded.len() as u64,
            encoded_content_length(8, 4, ChecksumAlgorithm::Crc32c, header)
        );
    }

    #[test]
    fn test_chunk_length_hex_width() {
        assert_eq!(chunk_length(15), 1 + 2 + 15 + 2);
        assert_eq!(chunk_length(16), 2 + 2 + 16 + 2);
        assert_eq!(chunk_length(128 * 1024), 5 + 2 + 131072 + 2);
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(decode(b"zz\r\n").is_err());
        assert!(decode(b"5\r\nab").is_err());
        assert!(decode(b"2\r\nabXX0\r\n\r\n").is_err());
        assert!(decode(b"0\r\nno-colon\r\n\r\n").is_err());
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let header = "x-amz-checksum-crc32";
        let mut encoded = encode_blocking(b"hello", ChecksumAlgorithm::Crc32, header, 16);
        encoded[3] = b'j';
        let decoded = decode(&encoded).unwrap();
        assert!(matches!(
            decoded.verify(ChecksumAlgorithm::Crc32, header),
            Err(ChecksumError::Mismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_regroups_input_buffers() {
        let header = "x-amz-checksum-sha256";
        let parts: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cdefg")),
            Ok(Bytes::from_static(b"h")),
            Ok(Bytes::from_static(b"ij")),
        ];
        let stream =
            ChunkedEncodingStream::new(stream::iter(parts), ChecksumAlgorithm::Sha256, header, 4);
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        let encoded: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();

        assert_eq!(
            encoded,
            encode_blocking(b"abcdefghij", ChecksumAlgorithm::Sha256, header, 4)
        );
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            chunk in 1usize..300,
        ) {
            let header = "x-amz-checksum-crc32";
            let encoded = encode_blocking(&data, ChecksumAlgorithm::Crc32, header, chunk);

            prop_assert_eq!(
                encoded.len() as u64,
                encoded_content_length(data.len() as u64, chunk, ChecksumAlgorithm::Crc32, header)
            );

            let decoded = decode(&encoded).unwrap();
            prop_assert_eq!(&decoded.data[..], &data[..]);
            prop_assert!(decoded.verify(ChecksumAlgorithm::Crc32, header).is_ok());
        }
    }
}
