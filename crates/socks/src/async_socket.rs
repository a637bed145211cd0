use crate::buffered::{BufferedIterator, BufferedSequence};
use crate::pool::AsyncSocketPool;
use crate::{Interest, Socket, SocketAddress, SocketError};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::sync::Arc;
use tracing::trace;

/// A non-blocking [`Socket`] that suspends on a pool instead of blocking.
///
/// Every operation attempts the raw call first. When the call reports
/// [`SocketError::Blocked`] the socket suspends on its pool until the
/// descriptor is ready and then tries again, so `Blocked` never escapes.
#[derive(Debug, Clone)]
pub struct AsyncSocket {
    socket: Socket,
    pool: Arc<dyn AsyncSocketPool>,
}

impl AsyncSocket {
    /// Wraps `socket`, switching it to non-blocking mode.
    pub fn new(socket: Socket, pool: Arc<dyn AsyncSocketPool>) -> Result<Self, SocketError> {
        socket.set_nonblocking()?;
        Ok(Self { socket, pool })
    }

    /// Opens a stream socket and connects it to `address`.
    pub async fn connected(address: &SocketAddress, pool: Arc<dyn AsyncSocketPool>) -> Result<Self, SocketError> {
        let socket = Socket::new(address.family(), libc::SOCK_STREAM)?;
        let socket = match Self::new(socket, pool) {
            Ok(socket) => socket,
            Err(e) => {
                let _ = socket.close();
                return Err(e);
            }
        };
        if let Err(e) = socket.connect(address).await {
            let _ = socket.close();
            return Err(e);
        }
        Ok(socket)
    }

    pub fn socket(&self) -> Socket {
        self.socket
    }

    pub fn pool(&self) -> &Arc<dyn AsyncSocketPool> {
        &self.pool
    }

    async fn loop_until_ready<T, F>(&self, interest: Interest, mut attempt: F) -> Result<T, SocketError>
    where
        F: FnMut(&Socket) -> Result<T, SocketError> + Send,
        T: Send,
    {
        loop {
            match attempt(&self.socket) {
                Err(SocketError::Blocked) => self.pool.suspend_socket(self.socket.file(), interest).await?,
                result => return result,
            }
        }
    }

    /// Waits for the next connection on a listening socket.
    pub async fn accept(&self) -> Result<AsyncSocket, SocketError> {
        let (socket, peer) = self.loop_until_ready(Interest::READ, Socket::accept).await?;
        trace!(fd = %socket.file(), %peer, "accepted async socket");
        AsyncSocket::new(socket, Arc::clone(&self.pool))
    }

    /// Connects to `address`. A failed attempt reports the errno of the socket
    /// rather than the readiness error.
    pub async fn connect(&self, address: &SocketAddress) -> Result<(), SocketError> {
        loop {
            match self.socket.connect(address) {
                Err(SocketError::Blocked) => {}
                result => return result,
            }
            let resumed = self.pool.suspend_socket(self.socket.file(), Interest::READ_WRITE).await;
            if let Some(e) = self.socket.take_error("Connect")? {
                trace!(fd = %self.socket.file(), cause = %e, "connect failed");
                return Err(e);
            }
            resumed?;
        }
    }

    pub async fn read_byte(&self) -> Result<u8, SocketError> {
        let bytes = self.read_at_most(1).await?;
        bytes.first().copied().ok_or(SocketError::Disconnected)
    }

    /// Reads between 1 and `count` bytes.
    pub async fn read_at_most(&self, count: usize) -> Result<Bytes, SocketError> {
        self.loop_until_ready(Interest::READ, |socket| socket.read(count)).await
    }

    /// Reads exactly `count` bytes.
    pub async fn read_exact(&self, count: usize) -> Result<Bytes, SocketError> {
        let mut buffer = BytesMut::with_capacity(count);
        while buffer.len() < count {
            let chunk = self.read_at_most(count - buffer.len()).await?;
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Reads between 1 and `count` bytes, leaving them queued in the socket.
    pub async fn peek_at_most(&self, count: usize) -> Result<Bytes, SocketError> {
        self.loop_until_ready(Interest::READ, |socket| socket.peek(count)).await
    }

    /// Writes all of `data`.
    pub async fn write(&self, data: &[u8]) -> Result<(), SocketError> {
        let mut sent = 0;
        while sent < data.len() {
            let remaining = &data[sent..];
            sent += self.loop_until_ready(Interest::WRITE, |socket| socket.write(remaining)).await?;
        }
        Ok(())
    }

    pub fn close(&self) -> Result<(), SocketError> {
        self.socket.close()
    }

    /// The bytes received on this socket as a buffered sequence.
    pub fn bytes(&self) -> SocketBytes {
        SocketBytes { socket: self.clone(), ended: false }
    }

    /// Connections accepted on this listening socket, ending once it disconnects.
    ///
    /// Any other failure is yielded once and ends the stream.
    pub fn sockets(&self) -> impl Stream<Item = Result<AsyncSocket, SocketError>> + Send + 'static {
        futures::stream::unfold(Some(self.clone()), |listener| async move {
            let listener = listener?;
            match listener.accept().await {
                Ok(socket) => Some((Ok(socket), Some(listener))),
                Err(SocketError::Disconnected) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// The receive side of an [`AsyncSocket`].
///
/// Every iterator reads from the same socket, so bytes consumed by one are gone
/// for the others. A disconnect ends the sequence.
#[derive(Debug, Clone)]
pub struct SocketBytes {
    socket: AsyncSocket,
    ended: bool,
}

impl BufferedSequence for SocketBytes {
    type Iter = SocketBytes;

    fn make_iter(&self) -> Self::Iter {
        self.clone()
    }
}

#[async_trait]
impl BufferedIterator for SocketBytes {
    async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError> {
        if self.ended || at_most == 0 {
            return Ok(None);
        }
        match self.socket.read_at_most(at_most).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(SocketError::Disconnected) => {
                self.ended = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Peeks for the delimiter and only then reads, so bytes after the line stay
    /// in the socket for whoever reads next.
    async fn next_delimited(&mut self, delimiter: u8, limit: usize) -> Result<Option<Bytes>, SocketError> {
        if self.ended {
            return Ok(None);
        }
        let mut line = BytesMut::new();
        loop {
            let peeked = match self.socket.peek_at_most(limit.saturating_sub(line.len()).max(1)).await {
                Ok(peeked) => peeked,
                Err(SocketError::Disconnected) => {
                    self.ended = true;
                    return Ok((!line.is_empty()).then(|| line.freeze()));
                }
                Err(e) => return Err(e),
            };

            let found = peeked.iter().position(|byte| *byte == delimiter);
            let count = found.map_or(peeked.len(), |index| index + 1);
            line.extend_from_slice(&self.socket.read_exact(count).await?);
            if found.is_some() {
                return Ok(Some(line.freeze()));
            }
            if line.len() >= limit {
                return Err(SocketError::limit_exceeded(limit));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolConfig, PoolState};
    use crate::{SocketPool, with_timeout};

    use futures::StreamExt;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn start_pool() -> (SocketPool, JoinHandle<Result<(), SocketError>>) {
        let pool = SocketPool::make(&PoolConfig::default());
        pool.prepare().await.unwrap();
        let runner = tokio::spawn({
            let pool = pool.clone();
            async move { pool.run().await }
        });
        while pool.state() != PoolState::Running {
            tokio::task::yield_now().await;
        }
        (pool, runner)
    }

    async fn pair(pool: &SocketPool) -> (AsyncSocket, AsyncSocket) {
        let (left, right) = Socket::pair().unwrap();
        let pool: Arc<dyn AsyncSocketPool> = Arc::new(pool.clone());
        (AsyncSocket::new(left, Arc::clone(&pool)).unwrap(), AsyncSocket::new(right, pool).unwrap())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn read_waits_for_data() {
        let (pool, runner) = start_pool().await;
        let (left, right) = pair(&pool).await;

        let reader = tokio::spawn(async move { right.read_exact(5).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        left.write(b"hel").await.unwrap();
        left.write(b"lo").await.unwrap();

        let received = with_timeout(TIMEOUT, async { reader.await.unwrap() }).await.unwrap();
        assert_eq!(received, Bytes::from_static(b"hello"));

        left.close().unwrap();
        pool.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn large_write_suspends_until_drained() {
        let (pool, runner) = start_pool().await;
        let (left, right) = pair(&pool).await;

        let payload: Bytes = (0..1_048_576u32).map(|i| (i % 251) as u8).collect::<Vec<_>>().into();
        let writer = tokio::spawn({
            let payload = payload.clone();
            async move { left.write(&payload).await }
        });
        let received = with_timeout(TIMEOUT, right.read_exact(payload.len())).await.unwrap();
        assert_eq!(received, payload);
        writer.await.unwrap().unwrap();

        pool.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn lines_do_not_over_read() {
        let (pool, runner) = start_pool().await;
        let (left, right) = pair(&pool).await;

        left.write(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nBODY").await.unwrap();
        let mut bytes = right.bytes().make_iter();
        assert_eq!(bytes.next_delimited(b'\n', 64).await.unwrap().unwrap(), Bytes::from_static(b"GET / HTTP/1.1\r\n"));
        assert_eq!(bytes.next_delimited(b'\n', 64).await.unwrap().unwrap(), Bytes::from_static(b"Host: x\r\n"));
        assert_eq!(bytes.next_delimited(b'\n', 64).await.unwrap().unwrap(), Bytes::from_static(b"\r\n"));
        assert_eq!(right.read_exact(4).await.unwrap(), Bytes::from_static(b"BODY"));

        left.write(b"0123456789").await.unwrap();
        assert_eq!(bytes.next_delimited(b'\n', 4).await.unwrap_err(), SocketError::limit_exceeded(4));

        left.close().unwrap();
        assert_eq!(bytes.next_buffer(64).await.unwrap().unwrap(), Bytes::from_static(b"456789"));
        assert_eq!(bytes.next_buffer(64).await.unwrap(), None);
        assert_eq!(bytes.next_buffer(64).await.unwrap(), None);

        right.close().unwrap();
        pool.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn pool_is_running_before_sockets_are_used() {
        let (pool, runner) = start_pool().await;
        assert_eq!(pool.state(), PoolState::Running);
        pool.stop();
        assert_eq!(runner.await.unwrap(), Ok(()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn writes_to_a_half_closed_peer() {
        let (pool, runner) = start_pool().await;
        let (left, right) = pair(&pool).await;
        // SAFETY: `left` owns an open descriptor.
        assert_eq!(unsafe { libc::shutdown(left.socket().file().raw(), libc::SHUT_WR) }, 0);

        let payload: Bytes = vec![7u8; 1_048_576].into();
        let writer = tokio::spawn({
            let payload = payload.clone();
            async move { right.write(&payload).await }
        });
        while pool.waiter_count().await == 0 {
            tokio::task::yield_now().await;
        }

        let received = with_timeout(TIMEOUT, left.read_exact(payload.len())).await.unwrap();
        assert_eq!(received, payload);
        with_timeout(TIMEOUT, async { writer.await.unwrap() }).await.unwrap();

        left.close().unwrap();
        pool.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn refused_connect_reports_errno() {
        let (pool, runner) = start_pool().await;
        let shared: Arc<dyn AsyncSocketPool> = Arc::new(pool.clone());

        let closed = Socket::new(libc::AF_INET, libc::SOCK_STREAM).unwrap();
        closed.bind(&SocketAddress::loopback(0)).unwrap();
        let address = closed.sockname().unwrap();
        closed.close().unwrap();

        let result = with_timeout(TIMEOUT, AsyncSocket::connected(&address, shared)).await;
        assert!(
            matches!(result, Err(SocketError::Failed { kind: "Connect", errno, .. }) if errno == libc::ECONNREFUSED),
            "unexpected result {result:?}"
        );

        pool.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn accepts_loopback_connections() {
        let (pool, runner) = start_pool().await;
        let shared: Arc<dyn AsyncSocketPool> = Arc::new(pool.clone());

        let listener = Socket::new(libc::AF_INET, libc::SOCK_STREAM).unwrap();
        listener.set_reuse_address().unwrap();
        listener.bind(&SocketAddress::loopback(0)).unwrap();
        listener.listen(16).unwrap();
        let address = listener.sockname().unwrap();
        let listener = AsyncSocket::new(listener, Arc::clone(&shared)).unwrap();

        let mut incoming = Box::pin(listener.sockets());
        let (client, server) = tokio::join!(AsyncSocket::connected(&address, shared), incoming.next());
        let client = client.unwrap();
        let server = server.unwrap().unwrap();

        client.write(b"ping").await.unwrap();
        assert_eq!(with_timeout(TIMEOUT, server.read_exact(4)).await.unwrap(), Bytes::from_static(b"ping"));
        server.write(b"!").await.unwrap();
        assert_eq!(client.read_byte().await.unwrap(), b'!');

        client.close().unwrap();
        assert_eq!(server.read_byte().await.unwrap_err(), SocketError::Disconnected);

        server.close().unwrap();
        listener.close().unwrap();
        pool.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn stopped_pool_cancels_readers() {
        let (pool, runner) = start_pool().await;
        let (left, right) = pair(&pool).await;

        let reader = tokio::spawn(async move { right.read_byte().await });
        while pool.waiter_count().await == 0 {
            tokio::task::yield_now().await;
        }
        pool.stop();
        assert_eq!(reader.await.unwrap(), Err(SocketError::Cancelled));
        runner.await.unwrap().unwrap();
        left.close().unwrap();
    }
}
