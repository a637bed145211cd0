//! Line-oriented header parsing on top of a [`BufferedIterator`].
//!
//! Lines end at `\n`; a preceding `\r` and any trailing whitespace are dropped.
//! The header section ends at the first empty line, or when the source ends.

use crate::codec::DecoderConfig;
use crate::protocol::{HttpHeaders, ParseError, PayloadSize};
use crate::utils::ensure;

use ferry_socks::SocketError;
use ferry_socks::buffered::BufferedIterator;

use http::header;
use tracing::trace;

/// Reads one line without its terminator, or `None` when the source already ended.
///
/// Lines of `max_line_size` bytes or more fail with [`ParseError::TooLargeHeader`].
pub(crate) async fn read_line<I>(iter: &mut I, max_line_size: usize) -> Result<Option<String>, ParseError>
where
    I: BufferedIterator + ?Sized,
{
    let line = match iter.next_delimited(b'\n', max_line_size).await {
        Ok(line) => line,
        Err(SocketError::LimitExceeded { limit }) => return Err(ParseError::too_large_header(limit, max_line_size)),
        Err(e) => return Err(e.into()),
    };
    Ok(line.map(|line| String::from_utf8_lossy(line.trim_ascii_end()).into_owned()))
}

/// Reads header lines up to and including the blank line that ends them.
///
/// Lines that are not `Name: value` pairs are skipped.
pub(crate) async fn read_headers<I>(iter: &mut I, config: &DecoderConfig) -> Result<HttpHeaders, ParseError>
where
    I: BufferedIterator + ?Sized,
{
    let mut headers = HttpHeaders::new();
    while let Some(line) = read_line(iter, config.max_line_size).await? {
        if line.is_empty() {
            break;
        }
        if headers.append_line(&line) {
            ensure!(headers.len() <= config.max_header_num, ParseError::too_many_headers(config.max_header_num));
        } else {
            trace!(line = %line, "skip invalid header line");
        }
    }
    Ok(headers)
}

/// Works out the body framing from `Transfer-Encoding` and `Content-Length`.
///
/// refer: <https://www.rfc-editor.org/rfc/rfc9112.html#name-transfer-encoding>
pub(crate) fn parse_payload(headers: &HttpHeaders) -> Result<PayloadSize, ParseError> {
    let te_header = headers.get(header::TRANSFER_ENCODING);
    let cl_header = headers.get(header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Length(0)),

        (Some(te_value), None) => {
            if is_chunked(&te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Ok(PayloadSize::Length(0))
            }
        }

        (None, Some(cl_value)) => {
            let length = cl_value
                .trim()
                .parse::<usize>()
                .map_err(|_parse| ParseError::invalid_content_length(format!("value {cl_value} is not a length")))?;
            Ok(PayloadSize::Length(length))
        }

        (Some(_), Some(_)) => {
            Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers"))
        }
    }
}

/// Chunked only counts as the final coding.
fn is_chunked(value: &str) -> bool {
    value.rsplit(',').next().is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}
