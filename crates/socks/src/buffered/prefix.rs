use super::BufferedIterator;
use crate::SocketError;

use async_trait::async_trait;
use bytes::Bytes;

/// Caps an upstream iterator at `count` bytes.
///
/// Ends cleanly when either the cap is reached or the upstream ends, whichever
/// comes first; never pulls past the cap.
#[derive(Debug)]
pub struct BufferedPrefix<I> {
    upstream: I,
    remaining: usize,
}

impl<I: BufferedIterator> BufferedPrefix<I> {
    pub fn new(upstream: I, count: usize) -> Self {
        Self { upstream, remaining: count }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn into_inner(self) -> I {
        self.upstream
    }
}

#[async_trait]
impl<I: BufferedIterator> BufferedIterator for BufferedPrefix<I> {
    async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError> {
        if self.remaining == 0 || at_most == 0 {
            return Ok(None);
        }
        match self.upstream.next_buffer(at_most.min(self.remaining)).await? {
            Some(chunk) => {
                self.remaining -= chunk.len();
                Ok(Some(chunk))
            }
            None => {
                self.remaining = 0;
                Ok(None)
            }
        }
    }
}
