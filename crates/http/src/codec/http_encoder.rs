use crate::codec::body::ChunkedEncoder;
use crate::codec::header::HeaderEncoder;
use crate::protocol::body::BODY_BUFFER_SIZE;
use crate::protocol::{HttpBody, HttpRequest, HttpResponse, PayloadSize, SendError};

use ferry_socks::buffered::{self, BoxIterator};

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;
use tracing::trace;

/// Serializes messages for the wire.
///
/// A body of known length is sent as is behind `Content-Length`; any other body
/// is sent with the chunked transfer coding, `chunk_size` bytes per chunk.
#[derive(Debug, Clone, Copy)]
pub struct HttpEncoder {
    chunk_size: usize,
}

impl Default for HttpEncoder {
    fn default() -> Self {
        Self { chunk_size: BODY_BUFFER_SIZE }
    }
}

impl HttpEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self { chunk_size: chunk_size.max(1) }
    }

    /// Status line, headers and the blank line of `response`.
    pub fn encode_response_header(&self, response: &HttpResponse) -> Result<Bytes, SendError> {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((response, PayloadSize::from_count(response.body.count())), &mut dst)?;
        Ok(dst.freeze())
    }

    /// Request line, headers and the blank line of `request`. A body of unknown
    /// length is announced as empty.
    pub fn encode_request_header(&self, request: &HttpRequest) -> Result<Bytes, SendError> {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((request, PayloadSize::Length(request.body.count().unwrap_or(0))), &mut dst)?;
        Ok(dst.freeze())
    }

    /// The bytes to send after the header, framed to match it.
    pub fn body_iter(&self, body: &HttpBody) -> BoxIterator {
        match body.count() {
            Some(_) => Box::new(body.iter()),
            None => Box::new(ChunkedEncoder::new(body.iter(), self.chunk_size)),
        }
    }

    /// The whole response in one buffer.
    pub async fn encode_response(&self, response: &HttpResponse) -> Result<Bytes, SendError> {
        let header = self.encode_response_header(response)?;
        let body = buffered::collect(&mut self.body_iter(&response.body), self.chunk_size).await?;
        trace!(header_size = header.len(), body_size = body.len(), "encoded response");

        let mut dst = BytesMut::with_capacity(header.len() + body.len());
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&body);
        Ok(dst.freeze())
    }

    /// The whole request in one buffer. The body is collected first so its
    /// length can always be declared.
    pub async fn encode_request(&self, request: &HttpRequest) -> Result<Bytes, SendError> {
        let body = request.body.get().await?;

        let mut dst = BytesMut::new();
        HeaderEncoder.encode((request, PayloadSize::Length(body.len())), &mut dst)?;
        dst.extend_from_slice(&body);
        trace!(size = dst.len(), "encoded request");
        Ok(dst.freeze())
    }
}
