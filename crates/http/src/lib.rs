//! HTTP/1.1 messages over non-blocking ferry sockets.
//!
//! This crate turns the byte sequences of [`ferry_socks`] into HTTP requests and
//! responses and back. Bodies are not necessarily read up front: depending on
//! their declared length they are buffered, wrapped for replay, or streamed
//! straight from the connection.
//!
//! # Example
//!
//! A minimal connection loop: decode a request, flush whatever body the handler
//! left unread, then encode and write the response.
//!
//! ```no_run
//! use ferry_http::codec::{HttpDecoder, HttpEncoder};
//! use ferry_http::protocol::{HttpError, HttpResponse};
//! use ferry_socks::AsyncSocket;
//! use tracing::info;
//!
//! async fn serve(socket: AsyncSocket) -> Result<(), HttpError> {
//!     let decoder = HttpDecoder::new();
//!     let encoder = HttpEncoder::new();
//!     let bytes = socket.bytes();
//!
//!     loop {
//!         let request = decoder.decode_request(&bytes).await?;
//!         info!(method = %request.method, path = %request.path, "request");
//!
//!         let response = HttpResponse::default().with_body(format!("you asked for {}\n", request.path));
//!         request.body.flush_if_needed().await.map_err(ferry_http::protocol::SendError::from)?;
//!
//!         let encoded = encoder.encode_response(&response).await?;
//!         socket.write(&encoded).await.map_err(ferry_http::protocol::SendError::from)?;
//!         if !request.should_keep_alive() {
//!             return Ok(());
//!         }
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`protocol`]: requests, responses, headers, bodies and errors
//! - [`codec`]: [`HttpDecoder`](codec::HttpDecoder) and [`HttpEncoder`](codec::HttpEncoder)
//!
//! # Limitations
//!
//! - HTTP/1.0 and HTTP/1.1 only
//! - Maximum header line: 8KB by default
//! - Maximum number of headers: 64 by default

pub mod codec;
pub mod protocol;

mod utils;
