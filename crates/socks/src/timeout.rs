use crate::SocketError;

use std::future::Future;
use std::time::Duration;

/// Races `future` against a timer, failing with [`SocketError::Timeout`] once
/// `duration` elapses. The future is dropped on timeout, which cancels any
/// pool suspension it was waiting on.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, SocketError>
where
    F: Future<Output = Result<T, SocketError>>,
{
    tokio::time::timeout(duration, future).await.unwrap_or(Err(SocketError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn completes_in_time() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, SocketError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn times_out() {
        let result = with_timeout(Duration::from_millis(10), futures::future::pending::<Result<(), SocketError>>()).await;
        assert_eq!(result, Err(SocketError::Timeout));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn keeps_inner_errors() {
        let result = with_timeout(Duration::from_secs(1), async { Err::<(), _>(SocketError::Disconnected) }).await;
        assert_eq!(result, Err(SocketError::Disconnected));
    }
}
