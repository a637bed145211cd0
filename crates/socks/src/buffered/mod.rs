//! Pull based byte sequences that hand out contiguous chunks.
//!
//! A [`BufferedSequence`] creates [`BufferedIterator`]s; an iterator yields
//! [`Bytes`] chunks of `1..=at_most` bytes until it ends with `Ok(None)`. Every
//! adapter in this module is itself a sequence, so they stack:
//!
//! | adapter | passes | length |
//! |---------|--------|--------|
//! | [`BufferedCollection`] | restartable | known |
//! | [`ConsumingCollection`] | one shared cursor | known |
//! | [`CountedSequence`] | single | declared |
//! | [`BufferedFile`] | restartable | declared |
//! | [`BufferedPrefix`] | follows upstream | capped |
//! | [`SharedReplay`] | concurrent, restartable | declared |
//! | [`EmptySequence`] | any | zero |

mod collection;
mod counted;
mod file;
mod prefix;
mod replay;

pub use collection::{BufferedCollection, ConsumingCollection};
pub use counted::{CountedIter, CountedSequence};
pub use file::{BufferedFile, FileIter};
pub use prefix::BufferedPrefix;
pub use replay::{ReplayIter, SharedReplay};

use crate::SocketError;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

/// A type erased iterator, used where adapters own their upstream.
pub type BoxIterator = Box<dyn BufferedIterator>;

#[async_trait]
pub trait BufferedIterator: Send {
    /// Returns between 1 and `at_most` bytes, or `None` once the sequence ended.
    ///
    /// Once `None` was returned every later call returns `None` as well.
    async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError>;

    /// Returns exactly `count` bytes, failing with [`SocketError::Disconnected`]
    /// if the sequence ends first.
    async fn next_exact(&mut self, count: usize) -> Result<Bytes, SocketError> {
        let mut buffer = BytesMut::new();
        while buffer.len() < count {
            let Some(chunk) = self.next_buffer(count - buffer.len()).await? else {
                return Err(SocketError::Disconnected);
            };
            if buffer.is_empty() && chunk.len() == count {
                return Ok(chunk);
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Returns the bytes up to and including the next `delimiter`.
    ///
    /// Never consumes past the delimiter. A trailing line without delimiter is
    /// returned as is; `None` means the sequence had already ended. Lines longer
    /// than `limit` fail with [`SocketError::LimitExceeded`].
    async fn next_delimited(&mut self, delimiter: u8, limit: usize) -> Result<Option<Bytes>, SocketError> {
        let mut line = BytesMut::new();
        loop {
            let Some(byte) = self.next_buffer(1).await? else {
                return Ok((!line.is_empty()).then(|| line.freeze()));
            };
            line.extend_from_slice(&byte);
            if byte.first() == Some(&delimiter) {
                return Ok(Some(line.freeze()));
            }
            if line.len() >= limit {
                return Err(SocketError::limit_exceeded(limit));
            }
        }
    }
}

#[async_trait]
impl<I: BufferedIterator + ?Sized> BufferedIterator for Box<I> {
    async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError> {
        (**self).next_buffer(at_most).await
    }

    async fn next_exact(&mut self, count: usize) -> Result<Bytes, SocketError> {
        (**self).next_exact(count).await
    }

    async fn next_delimited(&mut self, delimiter: u8, limit: usize) -> Result<Option<Bytes>, SocketError> {
        (**self).next_delimited(delimiter, limit).await
    }
}

/// Something that can create [`BufferedIterator`]s.
pub trait BufferedSequence: Send + Sync {
    type Iter: BufferedIterator + 'static;

    fn make_iter(&self) -> Self::Iter;
}

/// Drains an iterator into one contiguous buffer.
pub async fn collect<I: BufferedIterator + ?Sized>(iter: &mut I, chunk_size: usize) -> Result<Bytes, SocketError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = iter.next_buffer(chunk_size).await? {
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// A sequence without any bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySequence;

#[async_trait]
impl BufferedIterator for EmptySequence {
    async fn next_buffer(&mut self, _at_most: usize) -> Result<Option<Bytes>, SocketError> {
        Ok(None)
    }
}

impl BufferedSequence for EmptySequence {
    type Iter = EmptySequence;

    fn make_iter(&self) -> Self::Iter {
        EmptySequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Yields its bytes one at a time so the default methods are exercised.
    struct Trickle(Bytes);

    #[async_trait]
    impl BufferedIterator for Trickle {
        async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError> {
            if self.0.is_empty() || at_most == 0 {
                return Ok(None);
            }
            Ok(Some(self.0.split_to(1)))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn next_exact_joins_chunks() {
        let mut iter = Trickle(Bytes::from_static(b"abcdef"));
        assert_eq!(iter.next_exact(4).await.unwrap(), Bytes::from_static(b"abcd"));
        assert_eq!(iter.next_exact(0).await.unwrap(), Bytes::new());
        assert_eq!(iter.next_exact(3).await.unwrap_err(), SocketError::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn next_delimited_stops_at_delimiter() {
        let mut iter = Trickle(Bytes::from_static(b"GET /\r\nHost: h\r\ntail"));
        assert_eq!(iter.next_delimited(b'\n', 64).await.unwrap().unwrap(), Bytes::from_static(b"GET /\r\n"));
        assert_eq!(iter.next_delimited(b'\n', 64).await.unwrap().unwrap(), Bytes::from_static(b"Host: h\r\n"));
        assert_eq!(iter.next_delimited(b'\n', 64).await.unwrap().unwrap(), Bytes::from_static(b"tail"));
        assert_eq!(iter.next_delimited(b'\n', 64).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn next_delimited_enforces_limit() {
        let mut iter = Trickle(Bytes::from_static(b"0123456789\n"));
        assert_eq!(iter.next_delimited(b'\n', 4).await.unwrap_err(), SocketError::LimitExceeded { limit: 4 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn empty_sequence_always_ends() {
        let mut iter = EmptySequence.make_iter();
        assert_eq!(iter.next_buffer(10).await.unwrap(), None);
        assert_eq!(iter.next_buffer(10).await.unwrap(), None);
        assert_eq!(collect(&mut iter, 10).await.unwrap(), Bytes::new());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn boxed_iterator_forwards() {
        let mut iter: BoxIterator = Box::new(Trickle(Bytes::from_static(b"xy\n")));
        assert_eq!(iter.next_delimited(b'\n', 8).await.unwrap().unwrap(), Bytes::from_static(b"xy\n"));
    }
}
