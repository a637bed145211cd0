use super::ChunkedDecoder;
use crate::codec::DecoderConfig;
use crate::protocol::{HttpBody, ParseError, PayloadSize};

use ferry_socks::buffered::{BoxIterator, BufferedIterator, BufferedPrefix, CountedSequence, SharedReplay};

use tracing::trace;

/// Picks the body representation for a message whose head was just read.
///
/// With a declared length `L`, `B = shared_request_buffer_size` and
/// `R = shared_request_replay_size`:
///
/// - `L <= B`: exactly `L` bytes read into memory
/// - `B < L <= R`: a [`SharedReplay`] over the remaining bytes, capped at `L`
/// - `L > R`: a single pass [`CountedSequence`] capped at `L`
///
/// A chunked body is decoded lazily and can be read once.
pub(crate) async fn read_body(
    mut iter: BoxIterator,
    payload_size: PayloadSize,
    config: &DecoderConfig,
) -> Result<HttpBody, ParseError> {
    let length = match payload_size {
        PayloadSize::Chunked => {
            trace!("chunked body");
            return Ok(HttpBody::chunked(ChunkedDecoder::new(iter, config.max_line_size)));
        }
        PayloadSize::Length(length) => length,
    };

    if length <= config.shared_request_buffer_size {
        let bytes = iter.next_exact(length).await?;
        return Ok(HttpBody::Complete(bytes));
    }

    if length <= config.shared_request_replay_size {
        trace!(length, "replayable body");
        return Ok(HttpBody::Replay(SharedReplay::from_boxed(iter, length)));
    }

    trace!(length, "counted body");
    Ok(HttpBody::Counted(CountedSequence::new(BufferedPrefix::new(iter, length), length)))
}
