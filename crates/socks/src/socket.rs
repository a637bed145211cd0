//! Thin wrapper over non-blocking BSD socket syscalls.
//!
//! Every call maps `errno` into [`SocketError`]:
//!
//! - `EWOULDBLOCK` / `EAGAIN` / `EINPROGRESS` / `EALREADY` become [`SocketError::Blocked`]
//! - a zero byte read, `EBADF`, `ECONNRESET` and `EPIPE` become [`SocketError::Disconnected`]
//! - everything else becomes [`SocketError::Failed`]
//!
//! Nothing in here suspends; see [`AsyncSocket`](crate::AsyncSocket) for that.

use crate::{SocketAddress, SocketError};

use bytes::Bytes;
use libc::{c_int, c_void, socklen_t};
use std::fmt;
use std::mem;
use std::os::unix::io::RawFd;
use tracing::trace;

/// An OS socket handle used as a map key by the event queues and the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileDescriptor(RawFd);

impl FileDescriptor {
    pub const INVALID: FileDescriptor = FileDescriptor(-1);

    pub const fn new(raw: RawFd) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> RawFd {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl From<RawFd> for FileDescriptor {
    fn from(raw: RawFd) -> Self {
        Self(raw)
    }
}

impl fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: c_int = 0;

/// A socket descriptor. Closing is explicit, see [`Socket::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Socket {
    file: FileDescriptor,
}

impl Socket {
    /// Creates a socket, e.g. `Socket::new(libc::AF_INET, libc::SOCK_STREAM)`.
    pub fn new(domain: c_int, kind: c_int) -> Result<Self, SocketError> {
        // SAFETY: no pointer arguments.
        let raw = unsafe { libc::socket(domain, kind, 0) };
        if raw < 0 {
            return Err(SocketError::make_failed("CreateSocket"));
        }
        let socket = Self::with_file(FileDescriptor(raw));
        socket.prepare_signals()?;
        Ok(socket)
    }

    pub const fn with_file(file: FileDescriptor) -> Self {
        Self { file }
    }

    /// A connected pair of unix-domain stream sockets.
    pub fn pair() -> Result<(Socket, Socket), SocketError> {
        let mut fds: [c_int; 2] = [-1; 2];
        // SAFETY: `fds` has room for the two descriptors written by the call.
        let result = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        if result < 0 {
            return Err(SocketError::make_failed("SocketPair"));
        }
        let pair = (Self::with_file(FileDescriptor(fds[0])), Self::with_file(FileDescriptor(fds[1])));
        pair.0.prepare_signals()?;
        pair.1.prepare_signals()?;
        Ok(pair)
    }

    pub const fn file(&self) -> FileDescriptor {
        self.file
    }

    pub fn flags(&self) -> Result<c_int, SocketError> {
        // SAFETY: no pointer arguments.
        let flags = unsafe { libc::fcntl(self.file.0, libc::F_GETFL) };
        if flags < 0 {
            return Err(SocketError::make_failed("GetFlags"));
        }
        Ok(flags)
    }

    pub fn set_nonblocking(&self) -> Result<(), SocketError> {
        let flags = self.flags()?;
        if flags & libc::O_NONBLOCK != 0 {
            return Ok(());
        }
        // SAFETY: no pointer arguments.
        if unsafe { libc::fcntl(self.file.0, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(SocketError::make_failed("SetFlags"));
        }
        Ok(())
    }

    pub fn is_nonblocking(&self) -> Result<bool, SocketError> {
        Ok(self.flags()? & libc::O_NONBLOCK != 0)
    }

    pub fn set_reuse_address(&self) -> Result<(), SocketError> {
        self.set_option(libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)
    }

    fn set_option(&self, level: c_int, name: c_int, value: c_int) -> Result<(), SocketError> {
        // SAFETY: `value` lives across the call and its size is passed alongside.
        let result = unsafe {
            libc::setsockopt(
                self.file.0,
                level,
                name,
                (&raw const value).cast::<c_void>(),
                mem::size_of::<c_int>() as socklen_t,
            )
        };
        if result < 0 {
            return Err(SocketError::make_failed("SetOption"));
        }
        Ok(())
    }

    #[cfg(target_vendor = "apple")]
    fn prepare_signals(&self) -> Result<(), SocketError> {
        self.set_option(libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1)
    }

    #[cfg(not(target_vendor = "apple"))]
    #[allow(clippy::unused_self, clippy::unnecessary_wraps, reason = "writes pass MSG_NOSIGNAL instead")]
    fn prepare_signals(&self) -> Result<(), SocketError> {
        Ok(())
    }

    pub fn bind(&self, address: &SocketAddress) -> Result<(), SocketError> {
        let (storage, len) = address.to_storage()?;
        // SAFETY: `storage` holds a valid address of `len` bytes.
        let result = unsafe { libc::bind(self.file.0, (&raw const storage).cast::<libc::sockaddr>(), len) };
        if result < 0 {
            return Err(SocketError::make_failed("Bind"));
        }
        Ok(())
    }

    pub fn listen(&self, backlog: c_int) -> Result<(), SocketError> {
        // SAFETY: no pointer arguments.
        if unsafe { libc::listen(self.file.0, backlog) } < 0 {
            return Err(SocketError::make_failed("Listen"));
        }
        Ok(())
    }

    /// Accepts one pending connection.
    pub fn accept(&self) -> Result<(Socket, SocketAddress), SocketError> {
        // SAFETY: all-zero bytes are a valid `sockaddr_storage`.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        // SAFETY: `storage` and `len` describe a writable buffer of the advertised size.
        let raw = unsafe { libc::accept(self.file.0, (&raw mut storage).cast::<libc::sockaddr>(), &raw mut len) };
        if raw < 0 {
            return Err(Self::classify("Accept"));
        }
        let socket = Self::with_file(FileDescriptor(raw));
        socket.prepare_signals()?;
        let peer = SocketAddress::from_storage(&storage).unwrap_or_else(|_| SocketAddress::unix(""));
        trace!(fd = %self.file, accepted = %socket.file, peer = %peer, "accepted connection");
        Ok((socket, peer))
    }

    /// Starts or completes a connect; an already connected socket reports success.
    pub fn connect(&self, address: &SocketAddress) -> Result<(), SocketError> {
        let (storage, len) = address.to_storage()?;
        // SAFETY: `storage` holds a valid address of `len` bytes.
        let result = unsafe { libc::connect(self.file.0, (&raw const storage).cast::<libc::sockaddr>(), len) };
        if result < 0 {
            let errno = errno();
            if errno == libc::EISCONN {
                return Ok(());
            }
            return Err(Self::classify_errno("Connect", errno));
        }
        Ok(())
    }

    /// Takes the pending error of the socket (`SO_ERROR`), e.g. the outcome of a
    /// non-blocking connect.
    pub fn take_error(&self, kind: &'static str) -> Result<Option<SocketError>, SocketError> {
        let mut value: c_int = 0;
        let mut len = mem::size_of::<c_int>() as socklen_t;
        // SAFETY: `value` and `len` outlive the call and `len` holds the size of `value`.
        let result = unsafe {
            libc::getsockopt(self.file.0, libc::SOL_SOCKET, libc::SO_ERROR, (&raw mut value).cast::<c_void>(), &raw mut len)
        };
        if result < 0 {
            return Err(SocketError::make_failed("GetOption"));
        }
        Ok((value != 0).then(|| SocketError::from_io(kind, &std::io::Error::from_raw_os_error(value))))
    }

    /// Reads up to `at_most` bytes. Zero bytes read means the peer closed the connection.
    pub fn read(&self, at_most: usize) -> Result<Bytes, SocketError> {
        self.receive(at_most, 0)
    }

    /// Like [`Socket::read`] but leaves the bytes queued in the socket.
    pub fn peek(&self, at_most: usize) -> Result<Bytes, SocketError> {
        self.receive(at_most, libc::MSG_PEEK)
    }

    fn receive(&self, at_most: usize, flags: c_int) -> Result<Bytes, SocketError> {
        let mut buffer = vec![0u8; at_most.max(1)];
        // SAFETY: `buffer` is valid for `buffer.len()` writable bytes.
        let count = unsafe { libc::recv(self.file.0, buffer.as_mut_ptr().cast::<c_void>(), buffer.len(), flags) };
        if count < 0 {
            return Err(Self::classify("Read"));
        }
        if count == 0 {
            return Err(SocketError::Disconnected);
        }
        buffer.truncate(count as usize);
        Ok(Bytes::from(buffer))
    }

    /// Writes as much of `data` as the socket accepts, returning the count.
    pub fn write(&self, data: &[u8]) -> Result<usize, SocketError> {
        // SAFETY: `data` is valid for `data.len()` readable bytes.
        let count = unsafe { libc::send(self.file.0, data.as_ptr().cast::<c_void>(), data.len(), SEND_FLAGS) };
        if count < 0 {
            return Err(Self::classify("Write"));
        }
        Ok(count as usize)
    }

    pub fn sockname(&self) -> Result<SocketAddress, SocketError> {
        // SAFETY: all-zero bytes are a valid `sockaddr_storage`.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        // SAFETY: `storage` and `len` describe a writable buffer of the advertised size.
        if unsafe { libc::getsockname(self.file.0, (&raw mut storage).cast::<libc::sockaddr>(), &raw mut len) } < 0 {
            return Err(SocketError::make_failed("GetSockName"));
        }
        SocketAddress::from_storage(&storage)
    }

    pub fn remote_peer(&self) -> Result<SocketAddress, SocketError> {
        // SAFETY: all-zero bytes are a valid `sockaddr_storage`.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        // SAFETY: `storage` and `len` describe a writable buffer of the advertised size.
        if unsafe { libc::getpeername(self.file.0, (&raw mut storage).cast::<libc::sockaddr>(), &raw mut len) } < 0 {
            return Err(Self::classify("GetPeerName"));
        }
        SocketAddress::from_storage(&storage)
    }

    pub fn close(&self) -> Result<(), SocketError> {
        // SAFETY: no pointer arguments.
        if unsafe { libc::close(self.file.0) } < 0 {
            return Err(Self::classify("Close"));
        }
        Ok(())
    }

    fn classify(kind: &'static str) -> SocketError {
        Self::classify_errno(kind, errno())
    }

    fn classify_errno(kind: &'static str, errno: c_int) -> SocketError {
        match errno {
            libc::EWOULDBLOCK | libc::EINPROGRESS | libc::EALREADY | libc::EINTR => SocketError::Blocked,
            #[allow(unreachable_patterns, reason = "EAGAIN equals EWOULDBLOCK on most platforms")]
            libc::EAGAIN => SocketError::Blocked,
            libc::EBADF | libc::ECONNRESET | libc::EPIPE | libc::ENOTCONN => SocketError::Disconnected,
            _ => SocketError::from_io(kind, &std::io::Error::from_raw_os_error(errno)),
        }
    }
}

fn errno() -> c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
