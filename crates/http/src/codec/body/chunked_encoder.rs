use crate::protocol::PayloadItem;
use crate::utils::FastWrite;

use ferry_socks::SocketError;
use ferry_socks::buffered::BufferedIterator;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io::{self, Write};
use tokio_util::codec::Encoder;

/// Frames payload items as `<HEX>\r\n<data>\r\n`, ending with `0\r\n\r\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ChunkFramer {
    eof: bool,
}

impl ChunkFramer {
    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }
}

impl Encoder<PayloadItem> for ChunkFramer {
    type Error = io::Error;

    fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        match item {
            // an empty chunk would read as the terminator
            PayloadItem::Chunk(bytes) if bytes.is_empty() => Ok(()),
            PayloadItem::Chunk(bytes) => {
                write!(FastWrite(dst), "{:X}\r\n", bytes.len())?;
                dst.reserve(bytes.len() + 2);
                dst.extend_from_slice(&bytes);
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            PayloadItem::Eof => {
                self.eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}

/// Chunked transfer coding of an upstream of unknown length.
///
/// Upstream is pulled lazily, at most `chunk_size` bytes at a time, and each
/// pull becomes one chunk. The terminating chunk is emitted once, after which
/// the encoder ends.
pub struct ChunkedEncoder<I> {
    upstream: I,
    chunk_size: usize,
    framer: ChunkFramer,
    pending: BytesMut,
}

impl<I: BufferedIterator> ChunkedEncoder<I> {
    pub fn new(upstream: I, chunk_size: usize) -> Self {
        Self { upstream, chunk_size: chunk_size.max(1), framer: ChunkFramer::default(), pending: BytesMut::new() }
    }
}

impl<I> fmt::Debug for ChunkedEncoder<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedEncoder")
            .field("chunk_size", &self.chunk_size)
            .field("framer", &self.framer)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<I: BufferedIterator> BufferedIterator for ChunkedEncoder<I> {
    async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError> {
        if at_most == 0 {
            return Ok(None);
        }

        while self.pending.is_empty() && !self.framer.is_eof() {
            let item = match self.upstream.next_buffer(self.chunk_size).await? {
                Some(chunk) => PayloadItem::Chunk(chunk),
                None => PayloadItem::Eof,
            };
            self.framer.encode(item, &mut self.pending).map_err(|e| SocketError::from_io("encode", &e))?;
        }

        if self.pending.is_empty() {
            return Ok(None);
        }
        let count = at_most.min(self.pending.len());
        Ok(Some(self.pending.split_to(count).freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_socks::buffered::{BufferedCollection, BufferedSequence, collect};

    async fn frames<I: BufferedIterator>(encoder: &mut ChunkedEncoder<I>) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = encoder.next_buffer(1024).await.unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn empty_body_is_only_the_terminator() {
        let mut encoder = ChunkedEncoder::new(BufferedCollection::new(Bytes::new()).make_iter(), 3);
        assert_eq!(frames(&mut encoder).await, vec![Bytes::from_static(b"0\r\n\r\n")]);
        assert_eq!(encoder.next_buffer(1024).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn pulls_one_chunk_at_a_time() {
        let mut encoder = ChunkedEncoder::new(BufferedCollection::new(&b"hello"[..]).make_iter(), 3);
        assert_eq!(
            frames(&mut encoder).await,
            vec![
                Bytes::from_static(b"3\r\nhel\r\n"),
                Bytes::from_static(b"2\r\nlo\r\n"),
                Bytes::from_static(b"0\r\n\r\n"),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn sizes_are_upper_hex() {
        let payload = Bytes::from(vec![b'a'; 300]);
        let mut encoder = ChunkedEncoder::new(BufferedCollection::new(payload).make_iter(), 4096);
        let encoded = collect(&mut encoder, 7).await.unwrap();
        assert!(encoded.starts_with(b"12C\r\naaa"));
        assert!(encoded.ends_with(b"a\r\n0\r\n\r\n"));
        assert_eq!(encoded.len(), 5 + 300 + 2 + 5);
    }

    #[test]
    fn framer_ignores_items_after_eof() {
        let mut framer = ChunkFramer::default();
        let mut dst = BytesMut::new();
        framer.encode(PayloadItem::Chunk(Bytes::new()), &mut dst).unwrap();
        framer.encode(PayloadItem::Eof, &mut dst).unwrap();
        framer.encode(PayloadItem::Chunk(Bytes::from_static(b"late")), &mut dst).unwrap();
        framer.encode(PayloadItem::Eof, &mut dst).unwrap();
        assert_eq!(&dst[..], b"0\r\n\r\n");
    }
}
