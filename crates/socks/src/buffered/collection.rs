use super::{BufferedIterator, BufferedSequence};
use crate::SocketError;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory bytes. Every iterator starts again from the beginning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedCollection {
    bytes: Bytes,
}

impl BufferedCollection {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

impl BufferedSequence for BufferedCollection {
    type Iter = CollectionIter;

    fn make_iter(&self) -> Self::Iter {
        CollectionIter { remaining: self.bytes.clone() }
    }
}

#[derive(Debug)]
pub struct CollectionIter {
    remaining: Bytes,
}

#[async_trait]
impl BufferedIterator for CollectionIter {
    async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError> {
        if self.remaining.is_empty() || at_most == 0 {
            return Ok(None);
        }
        let count = at_most.min(self.remaining.len());
        Ok(Some(self.remaining.split_to(count)))
    }

    async fn next_delimited(&mut self, delimiter: u8, limit: usize) -> Result<Option<Bytes>, SocketError> {
        if self.remaining.is_empty() {
            return Ok(None);
        }
        let end = match self.remaining.iter().position(|byte| *byte == delimiter) {
            Some(index) => index + 1,
            None => self.remaining.len(),
        };
        if end > limit {
            return Err(SocketError::limit_exceeded(limit));
        }
        Ok(Some(self.remaining.split_to(end)))
    }
}

/// In-memory bytes behind one shared cursor.
///
/// Iterators behave like reads from the same socket: whatever one consumes
/// is gone for the others.
#[derive(Debug, Clone)]
pub struct ConsumingCollection {
    remaining: Arc<Mutex<Bytes>>,
}

impl ConsumingCollection {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self { remaining: Arc::new(Mutex::new(bytes.into())) }
    }

    /// Bytes not yet consumed by any iterator.
    pub fn remaining(&self) -> usize {
        self.remaining.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl BufferedSequence for ConsumingCollection {
    type Iter = ConsumingCollection;

    fn make_iter(&self) -> Self::Iter {
        self.clone()
    }
}

#[async_trait]
impl BufferedIterator for ConsumingCollection {
    async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError> {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        if remaining.is_empty() || at_most == 0 {
            return Ok(None);
        }
        let count = at_most.min(remaining.len());
        Ok(Some(remaining.split_to(count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn collection_restarts_for_every_iterator() {
        let collection = BufferedCollection::new(&b"hello world"[..]);
        let mut first = collection.make_iter();
        assert_eq!(first.next_buffer(5).await.unwrap().unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(first.next_buffer(100).await.unwrap().unwrap(), Bytes::from_static(b" world"));
        assert_eq!(first.next_buffer(100).await.unwrap(), None);

        let mut second = collection.make_iter();
        assert_eq!(second.next_exact(11).await.unwrap(), collection.bytes().clone());
        assert_eq!(second.next_buffer(1).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn collection_lines_are_zero_copy_slices() {
        let collection = BufferedCollection::new(&b"a\nbb\nccc"[..]);
        let mut iter = collection.make_iter();
        assert_eq!(iter.next_delimited(b'\n', 8).await.unwrap().unwrap(), Bytes::from_static(b"a\n"));
        assert_eq!(iter.next_delimited(b'\n', 8).await.unwrap().unwrap(), Bytes::from_static(b"bb\n"));
        assert_eq!(iter.next_delimited(b'\n', 2).await.unwrap_err(), SocketError::limit_exceeded(2));
        assert_eq!(iter.next_delimited(b'\n', 8).await.unwrap().unwrap(), Bytes::from_static(b"ccc"));
        assert_eq!(iter.next_delimited(b'\n', 8).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn consuming_iterators_share_a_cursor() {
        let collection = ConsumingCollection::new(&b"abcdef"[..]);
        let mut first = collection.make_iter();
        let mut second = collection.make_iter();
        assert_eq!(first.next_buffer(2).await.unwrap().unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(second.next_buffer(2).await.unwrap().unwrap(), Bytes::from_static(b"cd"));
        assert_eq!(collection.remaining(), 2);
        assert_eq!(first.next_exact(2).await.unwrap(), Bytes::from_static(b"ef"));
        assert_eq!(second.next_buffer(2).await.unwrap(), None);
    }
}
