use super::{BoxIterator, BufferedIterator, BufferedSequence};
use crate::SocketError;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// A single pass sequence of a declared number of bytes.
///
/// The upstream is consumed at most once. Only the first iterator may read;
/// any other iterator, or two iterators racing, fail with
/// [`SocketError::UnexpectedState`].
#[derive(Debug, Clone)]
pub struct CountedSequence {
    count: usize,
    loader: Arc<Mutex<Loader>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoaderState {
    Ready { index: usize },
    Complete,
}

struct Loader {
    count: usize,
    upstream: BoxIterator,
    state: LoaderState,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader").field("count", &self.count).field("state", &self.state).finish_non_exhaustive()
    }
}

impl Loader {
    async fn next_chunk(&mut self, from: usize, at_most: usize) -> Result<Option<Bytes>, SocketError> {
        let LoaderState::Ready { index } = self.state else {
            return Err(SocketError::unexpected_state("counted sequence already consumed"));
        };
        if index != from {
            return Err(SocketError::unexpected_state(format!("counted sequence at {index}, iterator at {from}")));
        }

        if at_most == 0 {
            return Ok(None);
        }
        let remaining = self.count - index;
        if remaining == 0 {
            self.state = LoaderState::Complete;
            return Ok(None);
        }

        match self.upstream.next_buffer(at_most.min(remaining)).await {
            Ok(Some(chunk)) => {
                self.state = LoaderState::Ready { index: index + chunk.len() };
                Ok(Some(chunk))
            }
            Ok(None) => {
                trace!(index, count = self.count, "counted sequence ended early");
                self.state = LoaderState::Complete;
                Err(SocketError::Disconnected)
            }
            Err(e) => {
                self.state = LoaderState::Complete;
                Err(e)
            }
        }
    }
}

impl CountedSequence {
    pub fn new<I: BufferedIterator + 'static>(upstream: I, count: usize) -> Self {
        Self::from_boxed(Box::new(upstream), count)
    }

    pub fn from_boxed(upstream: BoxIterator, count: usize) -> Self {
        let loader = Loader { count, upstream, state: LoaderState::Ready { index: 0 } };
        Self { count, loader: Arc::new(Mutex::new(loader)) }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Consumes whatever the iterator left unread so the upstream is positioned
    /// after the declared count.
    pub async fn flush_if_needed(&self) -> Result<(), SocketError> {
        let mut loader = self.loader.lock().await;
        while let LoaderState::Ready { index } = loader.state {
            loader.next_chunk(index, 4096).await?;
        }
        Ok(())
    }
}

impl BufferedSequence for CountedSequence {
    type Iter = CountedIter;

    fn make_iter(&self) -> Self::Iter {
        CountedIter { loader: Arc::clone(&self.loader), index: 0, ended: false }
    }
}

#[derive(Debug)]
pub struct CountedIter {
    loader: Arc<Mutex<Loader>>,
    index: usize,
    ended: bool,
}

#[async_trait]
impl BufferedIterator for CountedIter {
    async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError> {
        if self.ended || at_most == 0 {
            return Ok(None);
        }
        let mut loader =
            self.loader.try_lock().map_err(|_busy| SocketError::unexpected_state("concurrent iteration"))?;
        match loader.next_chunk(self.index, at_most).await? {
            Some(chunk) => {
                self.index += chunk.len();
                Ok(Some(chunk))
            }
            None => {
                self.ended = true;
                Ok(None)
            }
        }
    }
}
