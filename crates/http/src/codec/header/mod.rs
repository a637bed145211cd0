//! Header section decoding and encoding.
//!
//! - [`read_line`], [`read_headers`] and [`parse_payload`] read a message head
//!   from a byte source and work out how its body is framed.
//! - [`HeaderEncoder`] writes a request or response head with exactly one
//!   framing header.

mod header_decoder;
mod header_encoder;

pub(crate) use header_decoder::{parse_payload, read_headers, read_line};
pub(crate) use header_encoder::HeaderEncoder;
