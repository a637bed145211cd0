//! HTTP/1.x codec on top of buffered byte sequences.
//!
//! - [`HttpDecoder`] reads requests and responses from any
//!   [`BufferedSequence`](ferry_socks::BufferedSequence), e.g. the bytes of an
//!   [`AsyncSocket`](ferry_socks::AsyncSocket).
//! - [`HttpEncoder`] writes them back, choosing `Content-Length` or chunked framing.
//!
//! # Example
//!
//! ```no_run
//! use ferry_http::codec::{HttpDecoder, HttpEncoder};
//! use ferry_http::protocol::HttpResponse;
//! use ferry_socks::buffered::BufferedCollection;
//!
//! # async fn example() -> Result<(), ferry_http::protocol::HttpError> {
//! let source = BufferedCollection::new(&b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n"[..]);
//! let request = HttpDecoder::new().decode_request(&source).await?;
//! assert_eq!(request.path, "/hello");
//!
//! let response = HttpResponse::default().with_body("hello world");
//! let _bytes = HttpEncoder::new().encode_response(&response).await?;
//! # Ok(())
//! # }
//! ```

mod body;
mod header;
mod http_decoder;
mod http_encoder;
mod path;

pub use body::{ChunkedDecoder, ChunkedEncoder};
pub use http_decoder::{DecoderConfig, HttpDecoder};
pub use http_encoder::HttpEncoder;
