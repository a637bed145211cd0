//! Helpers shared across the crate.

/// Returns early with `$error` when `$predicate` does not hold.
///
/// ```ignore
/// ensure!(count <= limit, SocketError::limit_exceeded(limit));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Runs a syscall that reports failure as `-1`, retrying on `EINTR`.
pub(crate) fn retry_interrupted<F>(mut call: F) -> std::io::Result<isize>
where
    F: FnMut() -> isize,
{
    loop {
        let result = call();
        if result >= 0 {
            return Ok(result);
        }
        let error = std::io::Error::last_os_error();
        if error.raw_os_error() != Some(libc::EINTR) {
            return Err(error);
        }
    }
}
