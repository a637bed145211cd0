//! Body framing.
//!
//! - [`ChunkedDecoder`]: reads a `Transfer-Encoding: chunked` body
//! - [`ChunkedEncoder`]: writes a body of unknown length as chunks
//! - `read_body`: chooses how a decoded body is held, by its declared length

mod chunked_decoder;
mod chunked_encoder;
mod payload_decoder;

pub use chunked_decoder::ChunkedDecoder;
pub use chunked_encoder::ChunkedEncoder;
pub(crate) use payload_decoder::read_body;
