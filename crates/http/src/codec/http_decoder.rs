//! HTTP/1.x message decoding from a [`BufferedSequence`].
//!
//! The decoder reads the start line and the header section line by line, then
//! hands the rest of the byte source to the body. Depending on its declared
//! length the body is read eagerly, wrapped for replay, or streamed once; see
//! [`DecoderConfig`] for the thresholds.

use crate::codec::body::read_body;
use crate::codec::header::{parse_payload, read_headers, read_line};
use crate::codec::path::parse_target;
use crate::protocol::{HttpBody, HttpRequest, HttpResponse, ParseError};
use crate::utils::ensure;

use ferry_socks::SocketError;
use ferry_socks::buffered::{BoxIterator, BufferedSequence};

use http::{Method, StatusCode, Version};
use tracing::{debug, trace};

/// Limits and body thresholds used while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Bodies up to this many bytes are read into memory.
    pub shared_request_buffer_size: usize,
    /// Bodies up to this many bytes can be replayed; larger ones stream once.
    pub shared_request_replay_size: usize,
    pub max_line_size: usize,
    pub max_header_num: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            shared_request_buffer_size: 4096,
            shared_request_replay_size: 2_097_152,
            max_line_size: 8 * 1024,
            max_header_num: 64,
        }
    }
}

impl DecoderConfig {
    #[must_use]
    pub fn shared_request_buffer_size(mut self, size: usize) -> Self {
        self.shared_request_buffer_size = size;
        self
    }

    #[must_use]
    pub fn shared_request_replay_size(mut self, size: usize) -> Self {
        self.shared_request_replay_size = size;
        self
    }

    #[must_use]
    pub fn max_line_size(mut self, size: usize) -> Self {
        self.max_line_size = size;
        self
    }

    #[must_use]
    pub fn max_header_num(mut self, num: usize) -> Self {
        self.max_header_num = num;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpDecoder {
    config: DecoderConfig,
}

impl HttpDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Reads one request from `source`.
    ///
    /// The returned body may still read from `source`; flush it with
    /// [`HttpBody::flush_if_needed`] before decoding the next message.
    pub async fn decode_request<S>(&self, source: &S) -> Result<HttpRequest, ParseError>
    where
        S: BufferedSequence + ?Sized,
    {
        let mut iter: BoxIterator = Box::new(source.make_iter());

        let line = self.read_start_line(&mut iter).await?;
        let (method, target, version) = split_start_line(&line)?;

        let method = Method::from_bytes(method.as_bytes()).map_err(|_invalid| ParseError::InvalidMethod)?;
        let version = parse_version(version)?;
        let (path, query) = parse_target(target)?;

        let headers = read_headers(&mut iter, &self.config).await?;
        let body = read_body(iter, parse_payload(&headers)?, &self.config).await?;
        debug!(%method, path = %path, body_size = ?body.count(), "decoded request");

        Ok(HttpRequest { method, version, path, query, headers, body })
    }

    /// Reads one response from `source`, collecting its whole body.
    pub async fn decode_response<S>(&self, source: &S) -> Result<HttpResponse, ParseError>
    where
        S: BufferedSequence + ?Sized,
    {
        let mut iter: BoxIterator = Box::new(source.make_iter());

        let line = self.read_start_line(&mut iter).await?;
        let (version, code, reason) = split_start_line(&line)?;

        let version = parse_version(version)?;
        let status = code
            .parse::<u16>()
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| ParseError::malformed(format!("invalid status code {code}")))?;
        let reason = reason.to_string();

        let headers = read_headers(&mut iter, &self.config).await?;
        let body = read_body(iter, parse_payload(&headers)?, &self.config).await?;
        let body = match body.get().await {
            Ok(bytes) => HttpBody::Complete(bytes),
            Err(SocketError::UnexpectedState { reason }) => return Err(ParseError::invalid_body(reason)),
            Err(e) => return Err(e.into()),
        };
        debug!(%status, body_size = ?body.count(), "decoded response");

        Ok(HttpResponse { version, status, reason, headers, body })
    }

    async fn read_start_line(&self, iter: &mut BoxIterator) -> Result<String, ParseError> {
        let line = read_line(iter, self.config.max_line_size).await?.ok_or(SocketError::Disconnected)?;
        trace!(line = %line, "read start line");
        Ok(line)
    }
}

/// Splits a start line into its three space separated parts. Only the first
/// two spaces separate, so a reason phrase may contain spaces.
fn split_start_line(line: &str) -> Result<(&str, &str, &str), ParseError> {
    let malformed = || ParseError::malformed(format!("start line {line:?} does not have three parts"));

    let (first, rest) = line.trim().split_once(' ').ok_or_else(malformed)?;
    let (second, third) = rest.trim_start().split_once(' ').ok_or_else(malformed)?;
    let third = third.trim_start();
    ensure!(!third.is_empty(), malformed());
    Ok((first, second, third))
}

fn parse_version(version: &str) -> Result<Version, ParseError> {
    match version {
        "HTTP/1.0" => Ok(Version::HTTP_10),
        "HTTP/1.1" => Ok(Version::HTTP_11),
        _ => Err(ParseError::InvalidVersion(version.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QueryItem;
    use bytes::Bytes;
    use ferry_socks::buffered::{BufferedCollection, ConsumingCollection};
    use indoc::indoc;

    fn post(length: usize) -> BufferedCollection {
        let mut wire = format!("POST /upload HTTP/1.1\r\nContent-Length: {length}\r\n\r\n").into_bytes();
        wire.extend(std::iter::repeat_n(b'x', length));
        BufferedCollection::new(wire)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn simple_get() {
        let source = BufferedCollection::new(&b"GET /a?x=1 HTTP/1.1\r\nHost: h\r\n\r\n"[..]);
        let request = HttpDecoder::new().decode_request(&source).await.unwrap();

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.version, Version::HTTP_11);
        assert_eq!(request.path, "/a");
        assert_eq!(request.query, vec![QueryItem::new("x", "1")]);
        assert_eq!(request.headers.get("host").as_deref(), Some("h"));
        assert!(!request.headers.contains("content-length"));
        assert_eq!(request.body.count(), Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn from_curl() {
        let str = indoc! {r##"
        GET /docs/../index.html HTTP/1.0
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##};

        let request = HttpDecoder::new().decode_request(&BufferedCollection::new(str)).await.unwrap();
        assert_eq!(request.version, Version::HTTP_10);
        assert_eq!(request.path, "/index.html");
        assert_eq!(request.headers.len(), 3);
        assert_eq!(request.headers.get("accept").as_deref(), Some("*/*"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn malformed_start_lines() {
        let decoder = HttpDecoder::new();
        let result = decoder.decode_request(&BufferedCollection::new(&b"GET /\r\n\r\n"[..])).await;
        assert!(matches!(result, Err(ParseError::MalformedMessage { .. })));

        let result = decoder.decode_request(&BufferedCollection::new(&b"GET / HTTP/2.0\r\n\r\n"[..])).await;
        assert!(matches!(result, Err(ParseError::InvalidVersion(v)) if v == "HTTP/2.0"));

        let result = decoder.decode_request(&BufferedCollection::new(&b"G(T / HTTP/1.1\r\n\r\n"[..])).await;
        assert!(matches!(result, Err(ParseError::InvalidMethod)));

        let result = decoder.decode_request(&BufferedCollection::new(Bytes::new())).await;
        assert!(result.unwrap_err().socket_error().is_some_and(SocketError::is_disconnected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn body_thresholds() {
        let decoder = HttpDecoder::with_config(
            DecoderConfig::default().shared_request_buffer_size(4).shared_request_replay_size(8),
        );

        for (length, expect_complete, expect_replay) in
            [(0, true, false), (4, true, false), (5, false, true), (8, false, true), (9, false, false)]
        {
            let request = decoder.decode_request(&post(length)).await.unwrap();
            let body = &request.body;
            assert_eq!(body.count(), Some(length));
            assert_eq!(matches!(body, HttpBody::Complete(_)), expect_complete, "length {length}");
            assert_eq!(matches!(body, HttpBody::Replay(_)), expect_replay, "length {length}");
            assert_eq!(matches!(body, HttpBody::Counted(_)), !expect_complete && !expect_replay, "length {length}");
            assert_eq!(body.get().await.unwrap(), Bytes::from(vec![b'x'; length]));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn replay_depends_on_size() {
        let wire = b"POST /fish HTTP/1.1\r\nContent-Length: 12\r\n\r\nFish & Chips";

        let config = DecoderConfig::default().shared_request_buffer_size(1);
        let request = HttpDecoder::with_config(config.shared_request_replay_size(100))
            .decode_request(&BufferedCollection::new(&wire[..]))
            .await
            .unwrap();
        assert!(request.body.can_replay());
        assert_eq!(request.body.get().await.unwrap(), Bytes::from_static(b"Fish & Chips"));
        assert_eq!(request.body.get().await.unwrap(), Bytes::from_static(b"Fish & Chips"));

        let request = HttpDecoder::with_config(config.shared_request_replay_size(2))
            .decode_request(&BufferedCollection::new(&wire[..]))
            .await
            .unwrap();
        assert!(!request.body.can_replay());
        assert_eq!(request.body.get().await.unwrap(), Bytes::from_static(b"Fish & Chips"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn short_body_disconnects() {
        let source = BufferedCollection::new(&b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort"[..]);
        let error = HttpDecoder::new().decode_request(&source).await.unwrap_err();
        assert!(error.socket_error().is_some_and(SocketError::is_disconnected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn invalid_content_length() {
        let source = BufferedCollection::new(&b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n"[..]);
        let result = HttpDecoder::new().decode_request(&source).await;
        assert!(matches!(result, Err(ParseError::InvalidContentLength { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn chunked_request_leaves_the_next_message() {
        let wire = indoc! {"
            POST /chunks HTTP/1.1\r
            Transfer-Encoding: chunked\r
            \r
            4\r
            Fish\r
            8\r
             & Chips\r
            0\r
            \r
            GET /next HTTP/1.1\r
            \r
        "};
        let source = ConsumingCollection::new(wire);
        let decoder = HttpDecoder::new();

        let request = decoder.decode_request(&source).await.unwrap();
        assert_eq!(request.body.count(), None);
        assert!(!request.body.can_replay());
        assert_eq!(request.body.get().await.unwrap(), Bytes::from_static(b"Fish & Chips"));

        let next = decoder.decode_request(&source).await.unwrap();
        assert_eq!(next.path, "/next");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn flushing_positions_the_source_at_the_next_request() {
        let mut wire = b"POST /a HTTP/1.1\r\nContent-Length: 20\r\n\r\n".to_vec();
        wire.extend_from_slice(&[b'-'; 20]);
        wire.extend_from_slice(b"GET /b HTTP/1.1\r\n\r\n");
        let source = ConsumingCollection::new(wire);
        let decoder = HttpDecoder::with_config(DecoderConfig::default().shared_request_buffer_size(4));

        let first = decoder.decode_request(&source).await.unwrap();
        first.body.flush_if_needed().await.unwrap();
        let second = decoder.decode_request(&source).await.unwrap();
        assert_eq!(second.path, "/b");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn response_with_body() {
        let source = BufferedCollection::new(&b"HTTP/1.1 418 I'm a teapot\r\nContent-Length: 5\r\n\r\nshort"[..]);
        let response = HttpDecoder::new().decode_response(&source).await.unwrap();
        assert_eq!(response.status, StatusCode::IM_A_TEAPOT);
        assert_eq!(response.reason, "I'm a teapot");
        assert!(matches!(&response.body, HttpBody::Complete(bytes) if bytes == "short"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn broken_chunked_response_is_invalid_body() {
        let source = BufferedCollection::new(&b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\nabc\r\n0\r\n\r\n"[..]);
        let result = HttpDecoder::new().decode_response(&source).await;
        assert!(matches!(result, Err(ParseError::InvalidBody { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn response_status_must_be_numeric() {
        let source = BufferedCollection::new(&b"HTTP/1.1 OK fine\r\n\r\n"[..]);
        let result = HttpDecoder::new().decode_response(&source).await;
        assert!(matches!(result, Err(ParseError::MalformedMessage { .. })));

        let source = BufferedCollection::new(&b"HTTP/1.1 200\r\n\r\n"[..]);
        let result = HttpDecoder::new().decode_response(&source).await;
        assert!(matches!(result, Err(ParseError::MalformedMessage { .. })));
    }
}
