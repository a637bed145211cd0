//! A buffered sequence that many readers can iterate concurrently.
//!
//! The upstream iterator is owned by a spawned actor. Readers send their cursor
//! and receive a chunk; bytes already buffered are served from memory, a reader
//! at the end of the buffer waits for the next pull. One pull is in flight at a
//! time and its chunk is handed to every waiting reader, so every upstream byte
//! is read exactly once no matter how many readers there are.

use super::{BoxIterator, BufferedIterator, BufferedSequence};
use crate::SocketError;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tracing::{debug, trace};

const FLUSH_CHUNK_SIZE: usize = 4096;

type ReadReply = oneshot::Sender<Result<Option<Bytes>, SocketError>>;
type FlushReply = oneshot::Sender<Result<(), SocketError>>;

#[derive(Debug)]
enum Request {
    Read { cursor: usize, at_most: usize, reply: ReadReply },
    Flush { reply: FlushReply },
}

/// Replays the first `count` bytes of an upstream iterator to any number of readers.
///
/// Must be created inside a tokio runtime: the buffer lives in a spawned task
/// that ends once the sequence and all its iterators are dropped.
#[derive(Debug, Clone)]
pub struct SharedReplay {
    count: usize,
    requests: mpsc::UnboundedSender<Request>,
}

impl SharedReplay {
    pub fn new<I: BufferedIterator + 'static>(upstream: I, count: usize) -> Self {
        Self::from_boxed(Box::new(upstream), count)
    }

    pub fn from_boxed(upstream: BoxIterator, count: usize) -> Self {
        let (requests, receiver) = mpsc::unbounded();
        let buffer = ReplayBuffer {
            count,
            len: 0,
            chunks: Vec::new(),
            starts: Vec::new(),
            upstream: Some(upstream),
            pull: None,
            ended: count == 0,
            failure: None,
            readers: Vec::new(),
            flushes: Vec::new(),
        };
        tokio::spawn(buffer.run(receiver));
        Self { count, requests }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Pulls the rest of the upstream into memory.
    ///
    /// Afterwards the upstream is positioned right after the declared count and
    /// every iterator is served without touching it.
    pub async fn flush_if_needed(&self) -> Result<(), SocketError> {
        let (reply, receiver) = oneshot::channel();
        self.requests.unbounded_send(Request::Flush { reply }).map_err(|_closed| SocketError::Cancelled)?;
        receiver.await.map_err(|_canceled| SocketError::Cancelled)?
    }
}

impl BufferedSequence for SharedReplay {
    type Iter = ReplayIter;

    fn make_iter(&self) -> Self::Iter {
        ReplayIter { requests: self.requests.clone(), cursor: 0, ended: false }
    }
}

#[derive(Debug)]
pub struct ReplayIter {
    requests: mpsc::UnboundedSender<Request>,
    cursor: usize,
    ended: bool,
}

impl ReplayIter {
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

#[async_trait]
impl BufferedIterator for ReplayIter {
    async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError> {
        if self.ended || at_most == 0 {
            return Ok(None);
        }
        let (reply, receiver) = oneshot::channel();
        self.requests
            .unbounded_send(Request::Read { cursor: self.cursor, at_most, reply })
            .map_err(|_closed| SocketError::Cancelled)?;

        match receiver.await.map_err(|_canceled| SocketError::Cancelled)? {
            Ok(Some(chunk)) => {
                self.cursor += chunk.len();
                Ok(Some(chunk))
            }
            Ok(None) => {
                self.ended = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

type Pull = BoxFuture<'static, (BoxIterator, Result<Option<Bytes>, SocketError>)>;

enum Event {
    Request(Option<Request>),
    Pulled(BoxIterator, Result<Option<Bytes>, SocketError>),
}

struct ReplayBuffer {
    count: usize,
    len: usize,
    chunks: Vec<Bytes>,
    starts: Vec<usize>,
    /// `None` while a pull owns it.
    upstream: Option<BoxIterator>,
    pull: Option<Pull>,
    ended: bool,
    failure: Option<SocketError>,
    readers: Vec<(usize, ReadReply)>,
    flushes: Vec<FlushReply>,
}

impl ReplayBuffer {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        loop {
            let event = match &mut self.pull {
                Some(pull) => tokio::select! {
                    request = requests.next() => Event::Request(request),
                    (upstream, result) = pull => Event::Pulled(upstream, result),
                },
                None => Event::Request(requests.next().await),
            };

            match event {
                Event::Request(None) => break,
                Event::Request(Some(Request::Read { cursor, at_most, reply })) => self.read(cursor, at_most, reply),
                Event::Request(Some(Request::Flush { reply })) => self.flush(reply),
                Event::Pulled(upstream, result) => {
                    self.pull = None;
                    self.upstream = Some(upstream);
                    self.pulled(result);
                }
            }
        }
        debug!(buffered = self.len, count = self.count, "replay buffer released");
    }

    fn read(&mut self, cursor: usize, at_most: usize, reply: ReadReply) {
        if cursor < self.len {
            let _ = reply.send(Ok(Some(self.slice(cursor, at_most))));
        } else if let Some(failure) = &self.failure {
            let _ = reply.send(Err(failure.clone()));
        } else if self.ended {
            let _ = reply.send(Ok(None));
        } else {
            self.readers.push((at_most, reply));
            self.start_pull();
        }
    }

    fn flush(&mut self, reply: FlushReply) {
        if let Some(failure) = &self.failure {
            let _ = reply.send(Err(failure.clone()));
        } else if self.ended {
            let _ = reply.send(Ok(()));
        } else {
            self.flushes.push(reply);
            self.start_pull();
        }
    }

    fn start_pull(&mut self) {
        if self.pull.is_some() {
            return;
        }
        let Some(mut upstream) = self.upstream.take() else {
            return;
        };
        let requested = self.readers.iter().map(|(at_most, _)| *at_most).max().unwrap_or(FLUSH_CHUNK_SIZE);
        let at_most = requested.min(self.count - self.len);
        trace!(at_most, buffered = self.len, waiting = self.readers.len(), "pulling replay upstream");

        self.pull = Some(
            async move {
                let result = upstream.next_buffer(at_most).await;
                (upstream, result)
            }
            .boxed(),
        );
    }

    fn pulled(&mut self, result: Result<Option<Bytes>, SocketError>) {
        match result {
            Ok(Some(chunk)) if !chunk.is_empty() => {
                let start = self.len;
                let chunk = chunk.slice(..chunk.len().min(self.count - start));
                self.len += chunk.len();
                self.starts.push(start);
                self.chunks.push(chunk);
                self.ended = self.len == self.count;

                for (at_most, reply) in self.readers.drain(..) {
                    let _ = reply.send(Ok(Some(slice(&self.chunks, &self.starts, start, at_most))));
                }
                if self.ended {
                    for reply in self.flushes.drain(..) {
                        let _ = reply.send(Ok(()));
                    }
                } else if !self.flushes.is_empty() {
                    self.start_pull();
                }
            }
            Ok(_) => {
                self.ended = true;
                if self.len < self.count {
                    debug!(buffered = self.len, count = self.count, "replay upstream ended early");
                    self.fail(SocketError::Disconnected);
                } else {
                    for (_, reply) in self.readers.drain(..) {
                        let _ = reply.send(Ok(None));
                    }
                    for reply in self.flushes.drain(..) {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            Err(e) => {
                debug!(cause = %e, "replay upstream failed");
                self.ended = true;
                self.fail(e);
            }
        }
    }

    fn fail(&mut self, error: SocketError) {
        for (_, reply) in self.readers.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        for reply in self.flushes.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        self.failure = Some(error);
    }

    fn slice(&self, cursor: usize, at_most: usize) -> Bytes {
        slice(&self.chunks, &self.starts, cursor, at_most)
    }
}

/// Zero copy view of up to `at_most` buffered bytes from `cursor`, never
/// crossing a chunk boundary.
fn slice(chunks: &[Bytes], starts: &[usize], cursor: usize, at_most: usize) -> Bytes {
    let index = starts.partition_point(|start| *start <= cursor).saturating_sub(1);
    let Some(chunk) = chunks.get(index) else {
        return Bytes::new();
    };
    let offset = cursor - starts[index];
    chunk.slice(offset..chunk.len().min(offset + at_most))
}
