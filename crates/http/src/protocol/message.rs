use bytes::Bytes;

/// An item of an outgoing payload stream.
///
/// Framing encoders turn a body into a sequence of chunks terminated by `Eof`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    /// A chunk of payload data
    Chunk(Bytes),
    /// Marks the end of the payload stream
    Eof,
}

impl PayloadItem {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }
}

/// How a message body is framed on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// `Content-Length: n`
    Length(usize),
    /// `Transfer-Encoding: chunked`
    Chunked,
}

impl PayloadSize {
    /// Framing for a body whose length may be unknown.
    #[inline]
    pub fn from_count(count: Option<usize>) -> Self {
        count.map_or(PayloadSize::Chunked, PayloadSize::Length)
    }

    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Length(0))
    }
}
