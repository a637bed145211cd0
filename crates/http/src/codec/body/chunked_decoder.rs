//! Decoding of the chunked transfer coding.
//!
//! refer: <https://www.rfc-editor.org/rfc/rfc9112.html#name-chunked-transfer-coding>

use ferry_socks::SocketError;
use ferry_socks::buffered::{BoxIterator, BufferedIterator};

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Read the size line of the next chunk
    Size,
    /// Read chunk data
    Body { remaining: usize },
    /// Read the CRLF after chunk data
    BodyCrlf,
    /// Final state after the last chunk and its trailers
    End,
}

/// Yields the data of a chunked body, leaving the upstream positioned after
/// the trailer section. Chunk extensions and trailers are discarded.
pub struct ChunkedDecoder {
    upstream: BoxIterator,
    max_line_size: usize,
    state: ChunkedState,
}

impl ChunkedDecoder {
    pub fn new(upstream: BoxIterator, max_line_size: usize) -> Self {
        Self { upstream, max_line_size, state: ChunkedState::Size }
    }

    async fn read_line(&mut self) -> Result<Bytes, SocketError> {
        let line = self.upstream.next_delimited(b'\n', self.max_line_size).await?.ok_or(SocketError::Disconnected)?;
        Ok(line.slice_ref(line.trim_ascii()))
    }

    async fn read_size(&mut self) -> Result<usize, SocketError> {
        let line = self.read_line().await?;
        let size = line.split(|b| *b == b';').next().unwrap_or_default().trim_ascii();
        std::str::from_utf8(size)
            .ok()
            .and_then(|size| usize::from_str_radix(size, 16).ok())
            .ok_or_else(|| SocketError::unexpected_state(format!("invalid chunk size line {line:?}")))
    }

    async fn skip_trailers(&mut self) -> Result<(), SocketError> {
        loop {
            match self.upstream.next_delimited(b'\n', self.max_line_size).await? {
                Some(line) if !line.trim_ascii().is_empty() => trace!(len = line.len(), "skip chunked trailer"),
                _ => return Ok(()),
            }
        }
    }
}

impl fmt::Debug for ChunkedDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedDecoder").field("state", &self.state).finish_non_exhaustive()
    }
}

#[async_trait]
impl BufferedIterator for ChunkedDecoder {
    async fn next_buffer(&mut self, at_most: usize) -> Result<Option<Bytes>, SocketError> {
        if at_most == 0 {
            return Ok(None);
        }

        loop {
            match self.state {
                ChunkedState::End => return Ok(None),
                ChunkedState::Size => {
                    let size = self.read_size().await?;
                    trace!(size, "read chunk size");
                    if size == 0 {
                        self.skip_trailers().await?;
                        self.state = ChunkedState::End;
                    } else {
                        self.state = ChunkedState::Body { remaining: size };
                    }
                }
                ChunkedState::BodyCrlf => {
                    let line = self.read_line().await?;
                    if !line.is_empty() {
                        return Err(SocketError::unexpected_state("missing CRLF after chunk data"));
                    }
                    self.state = ChunkedState::Size;
                }
                ChunkedState::Body { remaining } => {
                    let chunk =
                        self.upstream.next_buffer(at_most.min(remaining)).await?.ok_or(SocketError::Disconnected)?;
                    let remaining = remaining - chunk.len();
                    self.state =
                        if remaining == 0 { ChunkedState::BodyCrlf } else { ChunkedState::Body { remaining } };
                    return Ok(Some(chunk));
                }
            }
        }
    }
}
