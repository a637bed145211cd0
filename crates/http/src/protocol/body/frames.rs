use super::BodyIter;

use ferry_socks::SocketError;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use http_body::{Body, Frame, SizeHint};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

type Read = BoxFuture<'static, (BodyIter, Result<Option<Bytes>, SocketError>)>;

enum State {
    Idle(BodyIter),
    Reading(Read),
    Done,
}

/// An [`HttpBody`](super::HttpBody) as an [`http_body::Body`] of data frames.
pub struct BodyFrames {
    size: Option<usize>,
    state: State,
}

impl BodyFrames {
    pub(crate) fn new(size: Option<usize>, iter: BodyIter) -> Self {
        Self { size, state: State::Idle(iter) }
    }
}

impl fmt::Debug for BodyFrames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyFrames").field("size", &self.size).field("done", &self.is_end_stream()).finish()
    }
}

impl Body for BodyFrames {
    type Data = Bytes;
    type Error = SocketError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.state, State::Done) {
                State::Idle(mut iter) => {
                    this.state = State::Reading(
                        async move {
                            let result = iter.next().await;
                            (iter, result)
                        }
                        .boxed(),
                    );
                }
                State::Reading(mut read) => {
                    return match read.poll_unpin(cx) {
                        Poll::Pending => {
                            this.state = State::Reading(read);
                            Poll::Pending
                        }
                        Poll::Ready((iter, Ok(Some(chunk)))) => {
                            this.state = State::Idle(iter);
                            Poll::Ready(Some(Ok(Frame::data(chunk))))
                        }
                        Poll::Ready((_, Ok(None))) => Poll::Ready(None),
                        Poll::Ready((_, Err(e))) => Poll::Ready(Some(Err(e))),
                    };
                }
                State::Done => return Poll::Ready(None),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.state, State::Done) || self.size == Some(0)
    }

    fn size_hint(&self) -> SizeHint {
        match self.size {
            Some(size) => SizeHint::with_exact(size as u64),
            None => SizeHint::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::HttpBody;

    use bytes::Bytes;
    use ferry_socks::buffered::{BufferedCollection, BufferedSequence};
    use http_body::Body;
    use http_body_util::BodyExt;

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn collects_every_frame() {
        let payload = Bytes::from(vec![b'x'; 10_000]);
        let frames = HttpBody::from(payload.clone()).into_frames();
        assert_eq!(frames.size_hint().exact(), Some(10_000));
        assert_eq!(frames.collect().await.unwrap().to_bytes(), payload);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn chunked_bodies_have_no_exact_size() {
        let body = HttpBody::chunked(BufferedCollection::new(&b"streamed"[..]).make_iter());
        let frames = body.into_frames();
        assert_eq!(frames.size_hint().exact(), None);
        assert_eq!(frames.collect().await.unwrap().to_bytes(), Bytes::from_static(b"streamed"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn empty_body_ends_immediately() {
        let frames = HttpBody::empty().into_frames();
        assert!(frames.is_end_stream());
        assert!(frames.collect().await.unwrap().to_bytes().is_empty());
    }
}
