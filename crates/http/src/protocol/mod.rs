//! HTTP message model.
//!
//! These are the values the codec reads and writes:
//!
//! - [`HttpRequest`] and [`HttpResponse`]: start line, [`HttpHeaders`] and an [`HttpBody`]
//! - [`body`]: in-memory, counted, chunked and replayable bodies
//! - [`PayloadItem`] and [`PayloadSize`]: how a body is framed on the wire
//! - [`HttpError`], [`ParseError`] and [`SendError`]: what can go wrong
//!
//! Decoded bodies may still be attached to the connection. Call
//! [`HttpBody::flush_if_needed`] before reading the next message from the same
//! byte source.

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod header;
pub use header::HttpHeaders;

mod request;
pub use request::HttpRequest;
pub use request::QueryItem;

mod response;
pub use response::HttpResponse;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
pub use body::BodyFrames;
pub use body::BodyIter;
pub use body::HttpBody;
