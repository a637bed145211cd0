//! Start line and header serialization.
//!
//! The framing headers of the message are always written by the encoder:
//! whatever `Content-Length` or `Transfer-Encoding` the caller set is replaced
//! by exactly one header matching the [`PayloadSize`].

use crate::protocol::{HttpHeaders, HttpRequest, HttpResponse, PayloadSize, SendError};
use crate::codec::path::encode_target;
use crate::utils::FastWrite;

use bytes::{BufMut, BytesMut};
use http::{Version, header};
use std::io::Write;
use tokio_util::codec::Encoder;
use tracing::error;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Encodes a request or response head followed by the blank line.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HeaderEncoder;

impl<'a> Encoder<(&'a HttpResponse, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (&'a HttpResponse, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (response, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        let reason = if response.reason.is_empty() {
            response.status.canonical_reason().unwrap_or_default()
        } else {
            response.reason.as_str()
        };
        write!(FastWrite(dst), "{} {} {}\r\n", version_str(response.version)?, response.status.as_str(), reason)?;

        write_headers(&response.headers, payload_size, dst)
    }
}

impl<'a> Encoder<(&'a HttpRequest, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (&'a HttpRequest, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (request, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        write!(
            FastWrite(dst),
            "{} {} {}\r\n",
            request.method.as_str(),
            encode_target(&request.path, &request.query),
            version_str(request.version)?
        )?;

        write_headers(&request.headers, payload_size, dst)
    }
}

fn version_str(version: Version) -> Result<&'static str, SendError> {
    match version {
        Version::HTTP_10 => Ok("HTTP/1.0"),
        Version::HTTP_11 => Ok("HTTP/1.1"),
        v => {
            error!(http_version = ?v, "unsupported http version");
            Err(SendError::UnsupportedVersion(v))
        }
    }
}

fn write_headers(headers: &HttpHeaders, payload_size: PayloadSize, dst: &mut BytesMut) -> Result<(), SendError> {
    for (header_name, header_value) in headers {
        if *header_name == header::CONTENT_LENGTH || *header_name == header::TRANSFER_ENCODING {
            continue;
        }
        dst.put_slice(header_name.as_ref());
        dst.put_slice(b": ");
        dst.put_slice(header_value.as_ref());
        dst.put_slice(b"\r\n");
    }

    match payload_size {
        PayloadSize::Length(n) => write!(FastWrite(dst), "{}: {n}\r\n", header::CONTENT_LENGTH)?,
        PayloadSize::Chunked => write!(FastWrite(dst), "{}: chunked\r\n", header::TRANSFER_ENCODING)?,
    }
    dst.put_slice(b"\r\n");
    Ok(())
}
