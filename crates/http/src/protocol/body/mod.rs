//! Message bodies.
//!
//! A decoded body is either already in memory or still attached to the
//! connection it arrived on. [`HttpBody`] hides the difference: every variant
//! can be read as chunks through [`HttpBody::iter`] or collected with
//! [`HttpBody::get`]. Only [`HttpBody::Complete`] and [`HttpBody::Replay`] can be
//! read more than once; the streaming variants hand out their bytes a single time.

mod frames;

pub use frames::BodyFrames;

use ferry_socks::buffered::{
    self, BoxIterator, BufferedCollection, BufferedFile, BufferedIterator, BufferedSequence, CountedSequence,
    SharedReplay,
};
use ferry_socks::SocketError;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Suggested chunk size when reading a body.
pub const BODY_BUFFER_SIZE: usize = 4096;

/// Files up to this size are read into memory by [`HttpBody::from_file`].
const MAX_COMPLETE_FILE_SIZE: usize = 10_485_760;

#[derive(Debug, Clone)]
pub enum HttpBody {
    /// All bytes in memory.
    Complete(Bytes),
    /// A known number of bytes, readable once.
    Counted(CountedSequence),
    /// An unknown number of bytes, readable once.
    Chunked(SingleUse),
    /// A known number of bytes, shared between any number of readers.
    Replay(SharedReplay),
}

impl HttpBody {
    pub fn empty() -> Self {
        HttpBody::Complete(Bytes::new())
    }

    /// A body of unknown length streamed from `iter`.
    pub fn chunked<I: BufferedIterator + 'static>(iter: I) -> Self {
        HttpBody::Chunked(SingleUse::new(Box::new(iter)))
    }

    /// Reads the file at `path`: in memory when small, streamed otherwise.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, SocketError> {
        Self::from_file_limited(path.as_ref(), MAX_COMPLETE_FILE_SIZE).await
    }

    async fn from_file_limited(path: &Path, max_complete: usize) -> Result<Self, SocketError> {
        let size = BufferedFile::size(path)?;
        if size <= max_complete {
            let bytes = tokio::fs::read(path).await.map_err(|e| SocketError::from_io("read", &e))?;
            return Ok(HttpBody::Complete(bytes.into()));
        }
        trace!(path = %path.display(), size, "streaming file body");
        let file = BufferedFile::with_range(path, 0, size);
        Ok(HttpBody::Counted(CountedSequence::new(file.make_iter(), size)))
    }

    /// Number of bytes, when known up front.
    pub fn count(&self) -> Option<usize> {
        match self {
            HttpBody::Complete(bytes) => Some(bytes.len()),
            HttpBody::Counted(counted) => Some(counted.count()),
            HttpBody::Chunked(_) => None,
            HttpBody::Replay(replay) => Some(replay.count()),
        }
    }

    pub fn can_replay(&self) -> bool {
        matches!(self, HttpBody::Complete(_) | HttpBody::Replay(_))
    }

    /// Collects the whole body into memory.
    pub async fn get(&self) -> Result<Bytes, SocketError> {
        match self {
            HttpBody::Complete(bytes) => Ok(bytes.clone()),
            _ => buffered::collect(&mut self.iter(), BODY_BUFFER_SIZE).await,
        }
    }

    /// Consumes whatever was left unread, so the connection is positioned at
    /// the next message.
    pub async fn flush_if_needed(&self) -> Result<(), SocketError> {
        match self {
            HttpBody::Complete(_) => Ok(()),
            HttpBody::Counted(counted) => counted.flush_if_needed().await,
            HttpBody::Replay(replay) => replay.flush_if_needed().await,
            HttpBody::Chunked(source) => match source.take() {
                Some(mut iter) => buffered::collect(&mut iter, BODY_BUFFER_SIZE).await.map(drop),
                None => Ok(()),
            },
        }
    }

    /// Iterates the body in chunks of at most [`BODY_BUFFER_SIZE`] bytes.
    pub fn iter(&self) -> BodyIter {
        let inner: BoxIterator = match self {
            HttpBody::Complete(bytes) => Box::new(BufferedCollection::new(bytes.clone()).make_iter()),
            HttpBody::Counted(counted) => Box::new(counted.make_iter()),
            HttpBody::Replay(replay) => Box::new(replay.make_iter()),
            HttpBody::Chunked(source) => source.take().unwrap_or_else(|| Box::new(Consumed)),
        };
        BodyIter { inner, buffer_size: BODY_BUFFER_SIZE }
    }

    /// Adapts the body to [`http_body::Body`].
    pub fn into_frames(self) -> BodyFrames {
        BodyFrames::new(self.count(), self.iter())
    }
}

impl Default for HttpBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for HttpBody {
    fn from(bytes: Bytes) -> Self {
        HttpBody::Complete(bytes)
    }
}

impl From<Vec<u8>> for HttpBody {
    fn from(bytes: Vec<u8>) -> Self {
        HttpBody::Complete(bytes.into())
    }
}

impl From<String> for HttpBody {
    fn from(string: String) -> Self {
        HttpBody::Complete(string.into())
    }
}

impl From<&'static str> for HttpBody {
    fn from(string: &'static str) -> Self {
        HttpBody::Complete(Bytes::from_static(string.as_bytes()))
    }
}

impl From<&'static [u8]> for HttpBody {
    fn from(bytes: &'static [u8]) -> Self {
        HttpBody::Complete(Bytes::from_static(bytes))
    }
}

impl From<CountedSequence> for HttpBody {
    fn from(counted: CountedSequence) -> Self {
        HttpBody::Counted(counted)
    }
}

impl From<SharedReplay> for HttpBody {
    fn from(replay: SharedReplay) -> Self {
        HttpBody::Replay(replay)
    }
}

/// Chunks of a body, see [`HttpBody::iter`].
pub struct BodyIter {
    inner: BoxIterator,
    buffer_size: usize,
}

impl BodyIter {
    pub async fn next(&mut self) -> Result<Option<Bytes>, SocketError> {
        self.inner.next_buffer(self.buffer_size).await
    }
}

impl fmt::Debug for BodyIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyIter").field("buffer_size", &self.buffer_size).finish_non_exhaustive()
    }
}

#[async_trait]
impl BufferedIterator for BodyIter {
    async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError> {
        self.inner.next_buffer(at_most).await
    }
}

/// An iterator that can be taken exactly once.
#[derive(Clone)]
pub struct SingleUse {
    iter: Arc<Mutex<Option<BoxIterator>>>,
}

impl SingleUse {
    pub fn new(iter: BoxIterator) -> Self {
        Self { iter: Arc::new(Mutex::new(Some(iter))) }
    }

    pub fn take(&self) -> Option<BoxIterator> {
        self.iter.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn is_consumed(&self) -> bool {
        self.iter.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

impl fmt::Debug for SingleUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleUse").field("consumed", &self.is_consumed()).finish()
    }
}

/// Stands in for a streaming body that was already handed out.
struct Consumed;

#[async_trait]
impl BufferedIterator for Consumed {
    async fn next_buffer(&mut self, _at_most: usize) -> Result<Option<Bytes>, SocketError> {
        Err(SocketError::unexpected_state("body already consumed"))
    }
}
