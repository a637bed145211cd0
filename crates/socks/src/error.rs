use std::io;
use thiserror::Error;

/// Errors surfaced by sockets, the socket pool and buffered sequences.
///
/// `Blocked` is produced by the raw [`Socket`](crate::socket::Socket) calls only.
/// [`AsyncSocket`](crate::AsyncSocket) retries it after suspending on the pool, so
/// callers of the async layer never observe it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    #[error("operation would block")]
    Blocked,

    #[error("socket disconnected")]
    Disconnected,

    #[error("{kind} failed (errno {errno}): {message}")]
    Failed { kind: &'static str, errno: i32, message: String },

    #[error("unsupported socket address")]
    UnsupportedAddress,

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("socket pool is not ready")]
    NotReady,

    #[error("unexpected state: {reason}")]
    UnexpectedState { reason: String },

    #[error("delimited read exceeded the limit {limit}")]
    LimitExceeded { limit: usize },
}

impl SocketError {
    /// Builds a `Failed` error from the calling thread's current `errno`.
    pub fn make_failed(kind: &'static str) -> Self {
        Self::from_io(kind, &io::Error::last_os_error())
    }

    pub fn from_io(kind: &'static str, error: &io::Error) -> Self {
        Self::Failed { kind, errno: error.raw_os_error().unwrap_or(-1), message: error.to_string() }
    }

    pub fn unexpected_state<S: ToString>(str: S) -> Self {
        Self::UnexpectedState { reason: str.to_string() }
    }

    pub fn limit_exceeded(limit: usize) -> Self {
        Self::LimitExceeded { limit }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<io::Error> for SocketError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock => Self::Blocked,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Self::Disconnected,
            io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::from_io("io", &error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_socket_errors() {
        assert_eq!(SocketError::from(io::Error::from(io::ErrorKind::WouldBlock)), SocketError::Blocked);
        assert_eq!(SocketError::from(io::Error::from(io::ErrorKind::UnexpectedEof)), SocketError::Disconnected);
        assert_eq!(SocketError::from(io::Error::from(io::ErrorKind::TimedOut)), SocketError::Timeout);

        let error = SocketError::from(io::Error::from_raw_os_error(libc::ENOENT));
        assert!(matches!(error, SocketError::Failed { kind: "io", errno, .. } if errno == libc::ENOENT));
    }

    #[test]
    fn failed_error_describes_kind_and_errno() {
        let error = SocketError::from_io("Bind", &io::Error::from_raw_os_error(libc::EADDRINUSE));
        assert!(error.to_string().starts_with(&format!("Bind failed (errno {})", libc::EADDRINUSE)));
    }
}
